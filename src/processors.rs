//! Builtin payload processors.
//!
//! A processor transforms a payload into a new payload of the same kind
//! before export. Required arguments are declared at registration and
//! verified during run pre-flight; value parsing errors surface as task
//! errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use image::imageops::FilterType;

use crate::error::RoutineError;
use crate::message::{ImageData, Message, Payload, PayloadKind};
use crate::registry::Registry;

pub fn register_builtins(reg: &mut Registry) {
    reg.register_processor(PayloadKind::Image, "grayscale", vec![], Arc::new(grayscale))
        .expect("builtin processor registration");
    reg.register_processor(PayloadKind::Image, "resize", vec!["width", "height"], Arc::new(resize))
        .expect("builtin processor registration");
    reg.register_processor(PayloadKind::Record, "select", vec!["fields"], Arc::new(select_fields))
        .expect("builtin processor registration");
}

fn image_of(msg: &Message) -> Result<&ImageData, RoutineError> {
    msg.payload.as_image().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::Image,
        actual: msg.payload.kind(),
    })
}

fn parse_arg<T: std::str::FromStr>(args: &BTreeMap<String, String>, name: &str) -> Result<T, RoutineError> {
    let raw = args
        .get(name)
        .ok_or_else(|| RoutineError::Invalid(format!("missing argument '{name}'")))?;
    raw.parse()
        .map_err(|_| RoutineError::Invalid(format!("invalid value '{raw}' for argument '{name}'")))
}

/// Collapse an RGB image to single-channel luma. Grayscale input passes
/// through unchanged.
fn grayscale(msg: &Message, _args: &BTreeMap<String, String>) -> Result<Payload, RoutineError> {
    let img = image_of(msg)?;
    if img.channels == 1 {
        return Ok(Payload::Image(img.clone()));
    }
    let rgb = image::RgbImage::from_raw(img.width, img.height, img.data.clone())
        .ok_or_else(|| RoutineError::Invalid("image buffer does not match dimensions".into()))?;
    let luma = image::imageops::grayscale(&rgb);
    Ok(Payload::Image(ImageData {
        width: img.width,
        height: img.height,
        channels: 1,
        data: luma.into_raw(),
    }))
}

/// Resize to `width` x `height` (triangle filter).
fn resize(msg: &Message, args: &BTreeMap<String, String>) -> Result<Payload, RoutineError> {
    let img = image_of(msg)?;
    let width: u32 = parse_arg(args, "width")?;
    let height: u32 = parse_arg(args, "height")?;
    if width == 0 || height == 0 {
        return Err(RoutineError::Invalid("resize dimensions must be nonzero".into()));
    }
    let data = match img.channels {
        1 => {
            let buf = image::GrayImage::from_raw(img.width, img.height, img.data.clone())
                .ok_or_else(|| RoutineError::Invalid("image buffer does not match dimensions".into()))?;
            image::imageops::resize(&buf, width, height, FilterType::Triangle).into_raw()
        }
        3 => {
            let buf = image::RgbImage::from_raw(img.width, img.height, img.data.clone())
                .ok_or_else(|| RoutineError::Invalid("image buffer does not match dimensions".into()))?;
            image::imageops::resize(&buf, width, height, FilterType::Triangle).into_raw()
        }
        n => return Err(RoutineError::Invalid(format!("unsupported channel count {n}"))),
    };
    Ok(Payload::Image(ImageData { width, height, channels: img.channels, data }))
}

/// Keep only the named top-level fields of a record. `fields` is a
/// comma-separated list; a named field missing from the record is an error.
fn select_fields(msg: &Message, args: &BTreeMap<String, String>) -> Result<Payload, RoutineError> {
    let record = msg.payload.as_record().ok_or(RoutineError::PayloadMismatch {
        expected: PayloadKind::Record,
        actual: msg.payload.kind(),
    })?;
    let fields: String = parse_arg(args, "fields")?;
    let obj = record
        .as_object()
        .ok_or_else(|| RoutineError::Invalid("record payload is not an object".into()))?;
    let mut out = serde_json::Map::new();
    for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let value = obj
            .get(field)
            .ok_or_else(|| RoutineError::Invalid(format!("record has no field '{field}'")))?;
        out.insert(field.to_string(), value.clone());
    }
    Ok(Payload::Record(serde_json::Value::Object(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn grayscale_collapses_rgb() {
        let msg = Message::new(
            "/cam",
            1.0,
            Payload::Image(ImageData { width: 2, height: 1, channels: 3, data: vec![255; 6] }),
        );
        let out = grayscale(&msg, &BTreeMap::new()).unwrap();
        let img = out.as_image().unwrap();
        assert_eq!(img.channels, 1);
        assert_eq!(img.data.len(), 2);
    }

    #[test]
    fn resize_changes_dimensions() {
        let msg = Message::new(
            "/cam",
            1.0,
            Payload::Image(ImageData { width: 4, height: 4, channels: 1, data: vec![128; 16] }),
        );
        let out = resize(&msg, &args(&[("width", "2"), ("height", "2")])).unwrap();
        let img = out.as_image().unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(img.data.len(), 4);
    }

    #[test]
    fn resize_rejects_bad_args() {
        let msg = Message::new(
            "/cam",
            1.0,
            Payload::Image(ImageData { width: 4, height: 4, channels: 1, data: vec![0; 16] }),
        );
        assert!(resize(&msg, &args(&[("width", "abc"), ("height", "2")])).is_err());
        assert!(resize(&msg, &args(&[("width", "0"), ("height", "2")])).is_err());
    }

    #[test]
    fn select_keeps_named_fields() {
        let msg = Message::new("/imu", 1.0, Payload::Record(json!({"ax": 1, "ay": 2, "az": 3})));
        let out = select_fields(&msg, &args(&[("fields", "ax, az")])).unwrap();
        assert_eq!(out.as_record().unwrap(), &json!({"ax": 1, "az": 3}));
    }

    #[test]
    fn select_missing_field_errors() {
        let msg = Message::new("/imu", 1.0, Payload::Record(json!({"ax": 1})));
        assert!(select_fields(&msg, &args(&[("fields", "gyro")])).is_err());
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let msg = Message::new("/imu", 1.0, Payload::Blob(vec![]));
        let err = grayscale(&msg, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RoutineError::PayloadMismatch { .. }));
    }
}
