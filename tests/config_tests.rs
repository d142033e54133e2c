//! Layered configuration loading

use std::fs;

use livefps::capture::RotateAngle;
use livefps::error::CaptureError;
use livefps::Config;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.capture.width, 640);
    assert_eq!(config.capture.height, 480);
    assert_eq!(config.capture.pixel_format, "MJPG");
    assert!(config.capture.convert_rgb);
    assert_eq!(config.pipeline.stop_timeout_ms, 200);
    assert_eq!(config.pipeline.warmup_reads, 3);
    assert_eq!(config.measure.angles, vec![0, 90, 180, 270]);
}

#[test]
fn test_default_capture_settings_validate() {
    let capture = Config::default().capture.to_configuration().unwrap();
    assert_eq!(capture.rotate(), RotateAngle::Deg0);
    assert_eq!(capture.target_fps(), 30.0);
}

#[test]
fn test_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("livefps.toml");
    fs::write(
        &path,
        r#"
[capture]
device = "synthetic"
width = 1280
height = 720
pixel_format = "yuyv"
rotate = 270
flip_horizontal = true

[measure]
pixel_formats = ["YUYV"]
angles = [90]
target_fps = [15.0, 60.0]
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.capture.device, "synthetic");
    assert_eq!(config.capture.width, 1280);
    // Untouched keys keep their defaults
    assert_eq!(config.capture.fps, 30.0);
    assert_eq!(config.pipeline.buffer_count, 4);

    let capture = config.capture.to_configuration().unwrap();
    assert_eq!(capture.pixel_format(), "YUYV");
    assert_eq!(capture.rotate(), RotateAngle::Deg270);
    assert!(capture.flip_horizontal());
    assert_eq!(capture.output_dimensions(), (720, 1280));

    let grid = config.measure.grid();
    assert_eq!(grid.len(), 2);
    assert_eq!(grid.target_fps, vec![15.0, 60.0]);
}

#[test]
fn test_invalid_rotation_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[capture]\nrotate = 45\n").unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert!(matches!(
        config.capture.to_configuration(),
        Err(CaptureError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_missing_file_is_an_error() {
    let result = Config::load(Some(std::path::Path::new("/nonexistent/livefps.toml")));
    assert!(matches!(result, Err(CaptureError::Config(_))));
}

#[test]
fn test_environment_overrides_defaults() {
    std::env::set_var("LIVEFPS__PIPELINE__STOP_TIMEOUT_MS", "350");
    let config = Config::load(None).unwrap();
    std::env::remove_var("LIVEFPS__PIPELINE__STOP_TIMEOUT_MS");
    assert_eq!(config.pipeline.stop_timeout_ms, 350);
}
