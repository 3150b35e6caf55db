use pretty_assertions::assert_eq;
use relocator_config::{
    ConfigError, LoggingConfig, RelocationConfig, RelocatorConfig, Strategy, CONFIG_FILE_NAME,
};
use relocator_engine::{FrameStrategy, Relocation};

#[test]
fn loads_a_full_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        r#"
strategy = "fast"
skip_source_namespace = false

[[relocations]]
source = "javax.persistence"
target = "jakarta.persistence"

[[relocations]]
source = "javax/ws/rs"
target = "jakarta/ws/rs"

[logging]
level = "debug"
json = true
"#,
    )
    .unwrap();

    let config = RelocatorConfig::load_from_path(&path).unwrap();
    assert_eq!(config.strategy, Strategy::Fast);
    assert!(!config.skip_source_namespace);
    assert_eq!(
        config.logging,
        LoggingConfig {
            level: "debug".to_owned(),
            json: true,
        }
    );
    assert_eq!(
        config.mapper().relocations(),
        &[
            Relocation::new("javax/persistence", "jakarta/persistence"),
            Relocation::new("javax/ws/rs", "jakarta/ws/rs"),
        ]
    );
    assert_eq!(config.options().strategy, FrameStrategy::Fast);
}

#[test]
fn missing_keys_fall_back_to_defaults() {
    let config = RelocatorConfig::load_from_str("").unwrap();
    assert_eq!(config, RelocatorConfig::default());

    let config = RelocatorConfig::load_from_str("relocations = []").unwrap();
    assert_eq!(config.relocations.len(), 2);
}

#[test]
fn invalid_relocations_are_rejected() {
    let cases = [
        ("", "jakarta/servlet"),
        ("javax/servlet", " "),
        ("javax/servlet", "javax/servlet/v2"),
    ];
    for (source, target) in cases {
        let config = RelocatorConfig {
            relocations: vec![RelocationConfig::new(source, target)],
            ..RelocatorConfig::default()
        };
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidRelocation { .. })),
            "{source:?} -> {target:?} should be rejected"
        );
    }

    let duplicate = RelocatorConfig {
        relocations: vec![
            RelocationConfig::new("javax/servlet", "jakarta/servlet"),
            RelocationConfig::new("javax.servlet", "jakarta/servlet2"),
        ],
        ..RelocatorConfig::default()
    };
    assert!(matches!(
        duplicate.validate(),
        Err(ConfigError::InvalidRelocation { .. })
    ));

    // A target reaching another pair's source would not be stable.
    let chained = RelocatorConfig {
        relocations: vec![
            RelocationConfig::new("javax/servlet", "jakarta/servlet"),
            RelocationConfig::new("jakarta", "org/jakarta"),
        ],
        ..RelocatorConfig::default()
    };
    assert!(chained.validate().is_err());
}

#[test]
fn command_line_relocations_replace_the_table() {
    let mut config = RelocatorConfig::default();
    config
        .set_relocations(vec![RelocationConfig::parse_pair("javax.mail=jakarta.mail").unwrap()])
        .unwrap();
    assert_eq!(
        config.mapper().relocations(),
        &[Relocation::new("javax/mail", "jakarta/mail")]
    );

    config.set_relocations(Vec::new()).unwrap();
    assert_eq!(config.relocations.len(), 1);
}

#[test]
fn parse_errors_do_not_echo_input() {
    let err = RelocatorConfig::load_from_str("strategy = \"sloppy\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));

    let err = RelocatorConfig::load_from_str("unknown_key = 1").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));

    let missing = tempfile::tempdir().unwrap().path().join("absent.toml");
    assert!(matches!(
        RelocatorConfig::load_from_path(missing),
        Err(ConfigError::Io { .. })
    ));
}
