#![no_main]
use libfuzzer_sys::fuzz_target;
use tms_core::mocks::RecordingIo;

fuzz_target!(|data: &str| {
    // Parsing, validation and machine mapping must reject bad input with
    // errors, never panics.
    let Ok(cfg) = toml::from_str::<tms_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    let machine = tms_core::MachineCfg::from(&cfg);
    if let Ok(mut ctrl) = tms_core::build_controller(RecordingIo::default(), machine, None) {
        let _ = ctrl.begin();
        let _ = ctrl.status();
    }
});
