use pycastblaster::config::{self, Configuration};

#[test]
fn missing_file_falls_back_to_defaults() {
    let cfg = config::load(std::path::Path::new("/nonexistent/config.yaml")).unwrap();
    assert_eq!(cfg.http_server_port, 8000);
    assert_eq!(cfg.chromecast_name, "Family Room TV");
}

#[test]
fn duration_rewrite_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "chromecast_name: \"Living Room\"\nslideshow_duration_seconds: 5\n",
    )
    .unwrap();

    let mut cfg: Configuration = config::load(&path).unwrap();
    cfg.slideshow_duration_seconds = 12.5;
    config::rewrite_slideshow_duration(&path, &cfg).unwrap();

    let reloaded = config::load(&path).unwrap();
    assert!((reloaded.slideshow_duration_seconds - 12.5).abs() < f64::EPSILON);
    assert_eq!(reloaded.chromecast_name, "Living Room");
}

#[test]
fn zero_duration_is_rejected_at_load() {
    let err = config::from_yaml_str("slideshow_duration_seconds: 0\n").unwrap_err();
    assert!(err.to_string().contains("invalid duration"));
}
