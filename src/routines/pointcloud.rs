//! Point cloud payload export: plain XYZ rows and ASCII PCD, one file per
//! message.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::RoutineError;
use crate::message::{Message, PayloadKind};
use crate::registry::{ExportMode, Registry};

pub fn register(reg: &mut Registry) {
    reg.register_routine(
        PayloadKind::PointCloud,
        &["pointcloud/xyz", "pointcloud/pcd"],
        ExportMode::MultiFile,
        Arc::new(export_pointcloud),
    )
    .expect("builtin routine registration");
}

fn points_of(msg: &Message) -> Result<&[[f32; 3]], RoutineError> {
    msg.payload.as_points().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::PointCloud,
        actual: msg.payload.kind(),
    })
}

fn export_pointcloud(msg: &Message, path: &Path, fmt: &str, _is_first: bool) -> Result<(), RoutineError> {
    let points = points_of(msg)?;
    match fmt {
        "pointcloud/pcd" => write_pcd(points, &path.with_extension("pcd")),
        _ => write_xyz(points, &path.with_extension("xyz")),
    }
}

fn write_xyz(points: &[[f32; 3]], path: &Path) -> Result<(), RoutineError> {
    let mut w = BufWriter::new(std::fs::File::create(path)?);
    for [x, y, z] in points {
        writeln!(w, "{x} {y} {z}")?;
    }
    w.flush()?;
    Ok(())
}

fn write_pcd(points: &[[f32; 3]], path: &Path) -> Result<(), RoutineError> {
    let mut w = BufWriter::new(std::fs::File::create(path)?);
    let n = points.len();
    writeln!(w, "# .PCD v0.7 - Point Cloud Data file format")?;
    writeln!(w, "VERSION 0.7")?;
    writeln!(w, "FIELDS x y z")?;
    writeln!(w, "SIZE 4 4 4")?;
    writeln!(w, "TYPE F F F")?;
    writeln!(w, "COUNT 1 1 1")?;
    writeln!(w, "WIDTH {n}")?;
    writeln!(w, "HEIGHT 1")?;
    writeln!(w, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(w, "POINTS {n}")?;
    writeln!(w, "DATA ascii")?;
    for [x, y, z] in points {
        writeln!(w, "{x} {y} {z}")?;
    }
    w.flush()?;
    Ok(())
}
