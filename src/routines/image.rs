//! Image payload export: PNG and JPEG encoders, one file per message.

use std::path::Path;
use std::sync::Arc;

use image::{ExtendedColorType, ImageFormat};

use crate::error::RoutineError;
use crate::message::{Message, PayloadKind};
use crate::registry::{ExportMode, Registry};

pub fn register(reg: &mut Registry) {
    reg.register_routine(
        PayloadKind::Image,
        &["image/png", "image/jpeg"],
        ExportMode::MultiFile,
        Arc::new(export_image),
    )
    .expect("builtin routine registration");
}

fn export_image(msg: &Message, path: &Path, fmt: &str, _is_first: bool) -> Result<(), RoutineError> {
    let img = msg.payload.as_image().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::Image,
        actual: msg.payload.kind(),
    })?;
    let color = match img.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        n => return Err(RoutineError::Invalid(format!("unsupported channel count {n}"))),
    };
    let expected = img.width as usize * img.height as usize * img.channels as usize;
    if img.data.len() != expected {
        return Err(RoutineError::Invalid(format!(
            "image buffer is {} bytes, dimensions require {expected}",
            img.data.len()
        )));
    }
    let (ext, format) = match fmt {
        "image/jpeg" => ("jpg", ImageFormat::Jpeg),
        _ => ("png", ImageFormat::Png),
    };
    image::save_buffer_with_format(
        path.with_extension(ext),
        &img.data,
        img.width,
        img.height,
        color,
        format,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ImageData, Payload};

    fn gray_msg() -> Message {
        Message::new(
            "/cam",
            1.0,
            Payload::Image(ImageData { width: 2, height: 2, channels: 1, data: vec![0, 64, 128, 255] }),
        )
    }

    #[test]
    fn writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cam_0");
        export_image(&gray_msg(), &base, "image/png", true).unwrap();
        let out = base.with_extension("png");
        assert!(out.exists());
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }

    #[test]
    fn writes_jpeg_extension() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cam_0");
        export_image(&gray_msg(), &base, "image/jpeg", true).unwrap();
        assert!(base.with_extension("jpg").exists());
    }

    #[test]
    fn rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let msg = Message::new(
            "/cam",
            1.0,
            Payload::Image(ImageData { width: 4, height: 4, channels: 3, data: vec![0; 5] }),
        );
        assert!(export_image(&msg, &dir.path().join("x"), "image/png", true).is_err());
    }
}
