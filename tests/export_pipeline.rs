//! End-to-end export runs through the public library API.

use std::collections::BTreeMap;

use serde_json::json;
use unbag::{
    Association, Exporter, ExportSpec, ImageData, Message, MemorySource, Payload, ProcessingSpec,
    Registry, ResampleSpec, RunConfig,
};

fn imu_source(n: usize) -> MemorySource {
    let mut src = MemorySource::new();
    for i in 0..n {
        src.push(Message::new(
            "/imu",
            i as f64 * 0.05,
            Payload::Record(json!({"ax": i as f64, "gyro": {"z": -(i as f64)}})),
        ));
    }
    src
}

#[test]
fn csv_export_preserves_order_and_counts() {
    let reg = Registry::with_builtins();
    let src = imu_source(50);
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![ExportSpec { channel: "/imu".into(), format: "text/csv".into(), subdir: None }],
        processing: vec![],
        resample: None,
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 100,
    };

    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    assert!(summary.success);
    assert_eq!(summary.exported["/imu"], 50);
    assert!(summary.errors.is_empty());

    let content = std::fs::read_to_string(dir.path().join("imu.csv")).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next().unwrap(), "timestamp,ax,gyro.z");
    let stamps: Vec<f64> =
        lines.map(|l| l.split(',').next().unwrap().parse().unwrap()).collect();
    assert_eq!(stamps.len(), 50);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn image_export_writes_one_file_per_message_into_subdir() {
    let reg = Registry::with_builtins();
    let mut src = MemorySource::new();
    for i in 0..3 {
        src.push(Message::new(
            "/cam/front",
            i as f64,
            Payload::Image(ImageData {
                width: 2,
                height: 2,
                channels: 3,
                data: vec![128; 12],
            }),
        ));
    }
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![ExportSpec {
            channel: "/cam/front".into(),
            format: "image/png".into(),
            subdir: Some("frames".into()),
        }],
        processing: vec![],
        resample: None,
        naming: "%name_%index".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 100,
    };

    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    assert_eq!(summary.exported["/cam/front"], 3);

    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("frames"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["cam_front_0.png", "cam_front_1.png", "cam_front_2.png"]);
}

#[test]
fn processor_chain_runs_before_export() {
    let reg = Registry::with_builtins();
    let src = imu_source(4);
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![ExportSpec { channel: "/imu".into(), format: "text/csv".into(), subdir: None }],
        processing: vec![ProcessingSpec {
            channel: "/imu".into(),
            processor: "select".into(),
            args: [("fields".to_string(), "ax".to_string())].into_iter().collect(),
        }],
        resample: None,
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 0,
    };

    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    assert!(summary.success);

    let content = std::fs::read_to_string(dir.path().join("imu.csv")).unwrap();
    assert_eq!(content.lines().next().unwrap(), "timestamp,ax");
    assert!(!content.contains("gyro"));
}

#[test]
fn resampled_run_exports_aligned_frames_only() {
    let reg = Registry::with_builtins();
    let mut src = MemorySource::new();
    for i in 0..5 {
        src.push(Message::new("/gps", i as f64, Payload::Record(json!({"lat": i}))));
    }
    src.push(Message::new("/speed", 0.02, Payload::Record(json!({"v": 1.0}))));
    src.push(Message::new("/speed", 2.98, Payload::Record(json!({"v": 2.0}))));

    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![
            ExportSpec { channel: "/gps".into(), format: "text/json".into(), subdir: None },
            ExportSpec { channel: "/speed".into(), format: "text/json".into(), subdir: None },
        ],
        processing: vec![],
        resample: Some(ResampleSpec {
            master: "/gps".into(),
            association: Association::Nearest,
            discard_eps: Some(0.1),
        }),
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 0,
    };

    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    // Only masters at t=0 and t=3 have a companion within 0.1s.
    assert_eq!(summary.exported["/gps"], 2);
    assert_eq!(summary.exported["/speed"], 2);
    assert_eq!(summary.discarded["/speed"], 3);
    assert!(summary.success);

    let gps = std::fs::read_to_string(dir.path().join("gps.json")).unwrap();
    assert_eq!(gps.lines().count(), 2);
}

#[test]
fn two_formats_same_channel_produce_both_outputs() {
    let reg = Registry::with_builtins();
    let src = imu_source(10);
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![
            ExportSpec { channel: "/imu".into(), format: "text/csv".into(), subdir: None },
            ExportSpec { channel: "/imu".into(), format: "text/json".into(), subdir: None },
        ],
        processing: vec![],
        resample: None,
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 100,
    };

    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    // One exported count per written message, across both formats.
    assert_eq!(summary.exported["/imu"], 20);
    assert!(dir.path().join("imu.csv").exists());
    assert!(dir.path().join("imu.json").exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("imu.json")).unwrap().lines().count(),
        10
    );
}

#[test]
fn custom_routine_via_registry() {
    use std::sync::Arc;
    use unbag::{ExportMode, PayloadKind};

    let mut reg = Registry::with_builtins();
    reg.register_routine(
        PayloadKind::Record,
        &["text/len"],
        ExportMode::SingleFile,
        Arc::new(|msg: &Message, path: &std::path::Path, _fmt: &str, is_first: bool| {
            use std::io::Write;
            let mut opts = std::fs::OpenOptions::new();
            if is_first {
                opts.write(true).create(true).truncate(true);
            } else {
                opts.append(true);
            }
            let mut f = opts.open(path.with_extension("len"))?;
            writeln!(f, "{}", msg.payload.as_record().map_or(0, |r| r.to_string().len()))?;
            Ok(())
        }),
    )
    .unwrap();

    let src = imu_source(3);
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![ExportSpec { channel: "/imu".into(), format: "text/len".into(), subdir: None }],
        processing: vec![],
        resample: None,
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 0,
    };
    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    assert_eq!(summary.exported["/imu"], 3);
    let content = std::fs::read_to_string(dir.path().join("imu.len")).unwrap();
    assert_eq!(content.lines().count(), 3);
}

#[test]
fn summary_discards_empty_without_resampling() {
    let reg = Registry::with_builtins();
    let src = imu_source(2);
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunConfig {
        exports: vec![ExportSpec { channel: "/imu".into(), format: "text/json".into(), subdir: None }],
        processing: vec![],
        resample: None,
        naming: "%name".into(),
        output_dir: dir.path().to_path_buf(),
        cpu_percentage: 0,
    };
    let summary = Exporter::new(&reg).run(&src, &cfg).unwrap();
    assert_eq!(summary.discarded, BTreeMap::new());
}
