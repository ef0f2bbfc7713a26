use planwire::config::{RuntimeConfig, ENV_MAX_MESSAGE_BYTES, ENV_MAX_PLAN_LOG_ENTRIES};
use planwire::ProtocolError;

mod helpers;
use helpers::EnvVarGuard;

#[test]
fn env_override_replaces_file_value() {
    let _g = EnvVarGuard::set(ENV_MAX_PLAN_LOG_ENTRIES, "7");
    let cfg = RuntimeConfig::from_yaml_str("max_plan_log_entries: 100\n")
        .expect("parse")
        .with_env_overrides()
        .expect("overrides");
    assert_eq!(cfg.max_plan_log_entries, 7);
}

#[test]
fn unset_env_leaves_defaults_alone() {
    let _g = EnvVarGuard::unset(ENV_MAX_MESSAGE_BYTES);
    let cfg = RuntimeConfig::default()
        .with_env_overrides()
        .expect("overrides");
    assert_eq!(cfg.max_message_bytes, RuntimeConfig::default().max_message_bytes);
}

#[test]
fn malformed_env_value_is_a_config_error() {
    for bad in ["0", "-3", "lots"] {
        let _g = EnvVarGuard::set(ENV_MAX_MESSAGE_BYTES, bad);
        let err = RuntimeConfig::default().with_env_overrides().unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)), "{err:#}");
        assert!(err.to_string().contains(ENV_MAX_MESSAGE_BYTES), "{err:#}");
    }
}

#[test]
fn tiny_message_limit_refuses_delivery() {
    let _g = EnvVarGuard::set(ENV_MAX_MESSAGE_BYTES, "16");
    let cfg = RuntimeConfig::default().with_env_overrides().expect("overrides");
    let rt = planwire::Runtime::new(cfg);
    let a = rt.spawn_worker("a").expect("spawn");
    let b = rt.spawn_worker("b").expect("spawn");
    let err = rt
        .send_object(
            planwire::actor::Actor::id(&*a),
            planwire::ObjectId(1),
            planwire::Payload::Str("far too long for sixteen bytes".into()),
            planwire::actor::Actor::id(&*b),
        )
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Delivery { .. }), "{err:#}");
}
