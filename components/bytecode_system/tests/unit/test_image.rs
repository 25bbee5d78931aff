//! Tests for BytecodeImage

use bytecode_system::{BytecodeImage, ConstValue, ImageBuilder, Opcode, PreloadFlags};
use core_types::ErrorKind;

fn sample_image() -> BytecodeImage {
    let mut builder = ImageBuilder::new();
    builder.define_function(Some("greet"), 2, PreloadFlags::PRELOAD_THIS, &[("who", 0)], |body| {
        body.push_string("hello ")
            .get_variable("who")
            .op(Opcode::Concat)
            .op(Opcode::Return);
    });
    builder.push_number(1.5).push_bool(true).op(Opcode::End);
    builder.build().unwrap()
}

#[test]
fn test_prepare_twice_returns_same_result() {
    let image = sample_image();
    let first = image.prepare().unwrap().clone();
    let second = image.prepare().unwrap();
    assert_eq!(&first, second);
    assert!(image.is_prepared());
}

#[test]
fn test_top_level_requires_prepare() {
    let image = sample_image();
    let error = image.top_level().unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidState);

    image.prepare().unwrap();
    let top = image.top_level().unwrap();
    assert_eq!(top.start, 0);
    assert_eq!(top.end, image.code().len() - 1);
}

#[test]
fn test_round_trip_preserves_code_and_constants() {
    let image = sample_image();
    let restored = BytecodeImage::from_bytes(&image.to_bytes()).unwrap();

    assert_eq!(restored.code(), image.code());
    assert_eq!(restored.constants(), image.constants());
    assert!(restored.is_prepared());
}

#[test]
fn test_add_const_data_indices_are_stable() {
    let mut image = sample_image();
    let before = image.constants().len();
    let index = image.add_const_data(ConstValue::from("late"));

    assert_eq!(index, before);
    assert_eq!(image.constant(index), Some(&ConstValue::from("late")));
    assert_eq!(image.constant(0), sample_image().constant(0));
}

#[test]
fn test_empty_image_prepares() {
    let image = BytecodeImage::default();
    let prepared = image.prepare().unwrap();
    assert_eq!(prepared.instruction_count, 0);
    assert!(image.top_level().unwrap().is_empty());
}

#[test]
fn test_read_missing_file_is_host_error() {
    let path = std::env::temp_dir().join("ember-image-that-does-not-exist.emb");
    let error = BytecodeImage::read_from(&path).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Host);
}

#[test]
fn test_write_then_read_file() {
    let image = sample_image();
    let path = std::env::temp_dir().join(format!("ember-image-{}.emb", std::process::id()));
    image.write_to(&path).unwrap();
    let restored = BytecodeImage::read_from(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(restored.code(), image.code());
}
