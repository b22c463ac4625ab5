//! Background Compilation Tests
//!
//! Tests for:
//! - Precompiled binaries replacing foreground compilation
//! - Capability gating of the worker
//! - Fallback to source when the driver rejects a binary
//! - Binaries from a previous device generation are discarded

use myth_shader_cache::device::recording::RecordingBinaryCompiler;
use myth_shader_cache::{
    Capabilities, ContextSettings, DeviceFeatures, GlslVersion, RecordingDevice, RenderConfig,
    ShaderContext,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn background_context() -> ShaderContext<RecordingDevice> {
    init_logger();
    let mut ctx = ShaderContext::new(
        RecordingDevice::new(),
        Capabilities::new(
            GlslVersion::ES_300,
            DeviceFeatures::BACKGROUND_COMPILE | DeviceFeatures::SHADER_BINARY,
        ),
        ContextSettings::default(),
    );
    assert!(ctx.attach_background_compiler(Box::new(RecordingBinaryCompiler)));
    ctx
}

// ============================================================================
// Precompiled binaries
// ============================================================================

#[test]
fn precompiled_binaries_skip_source_compilation() {
    let mut ctx = background_context();
    let config = RenderConfig::default();

    assert_eq!(ctx.precompile(&config), Ok(2));
    assert_eq!(ctx.wait_background(), 2);
    assert_eq!(ctx.binary_cache().len(), 2);

    // Already queued stages are not submitted twice.
    assert_eq!(ctx.precompile(&config), Ok(0));

    ctx.select_program(&config).unwrap();
    let counters = ctx.device().counters;
    assert_eq!(counters.binary_loads, 2);
    assert_eq!(counters.compiles, 0);
    assert_eq!(counters.links, 1);

    // Cached programs need no precompilation.
    assert_eq!(ctx.precompile(&config), Ok(0));
}

#[test]
fn rejected_binaries_fall_back_to_source() {
    let mut ctx = background_context();
    ctx.device_mut().accept_binaries = false;
    let config = RenderConfig {
        fog: true,
        ..Default::default()
    };

    ctx.precompile(&config).unwrap();
    ctx.wait_background();
    ctx.select_program(&config).unwrap();

    let counters = ctx.device().counters;
    assert_eq!(counters.binary_loads, 0);
    assert_eq!(counters.compiles, 2);
}

#[test]
fn context_loss_discards_binaries() {
    let mut ctx = background_context();
    ctx.precompile(&RenderConfig::default()).unwrap();
    ctx.wait_background();
    assert!(!ctx.binary_cache().is_empty());

    ctx.notify_context_lost();
    assert!(ctx.binary_cache().is_empty());
}

#[test]
fn binaries_finished_after_context_loss_are_dropped() {
    let mut ctx = background_context();
    assert_eq!(ctx.precompile(&RenderConfig::default()), Ok(2));

    ctx.notify_context_lost();
    assert_eq!(ctx.wait_background(), 0);
    assert!(ctx.binary_cache().is_empty());

    ctx.select_program(&RenderConfig::default()).unwrap();
    assert_eq!(ctx.device().counters.binary_loads, 0);
    assert_eq!(ctx.device().counters.compiles, 2);
}

// ============================================================================
// Capability gating
// ============================================================================

#[test]
fn worker_requires_background_compile_and_binary_support() {
    init_logger();
    let mut ctx = ShaderContext::new(
        RecordingDevice::new(),
        Capabilities::new(GlslVersion::ES_300, DeviceFeatures::BACKGROUND_COMPILE),
        ContextSettings::default(),
    );
    assert!(!ctx.attach_background_compiler(Box::new(RecordingBinaryCompiler)));
    assert_eq!(ctx.precompile(&RenderConfig::default()), Ok(0));
    assert_eq!(ctx.poll_background(), 0);
}

#[test]
fn replacing_the_device_drops_an_unsupported_worker() {
    let mut ctx = background_context();
    ctx.replace_device(
        RecordingDevice::new(),
        Capabilities::new(GlslVersion::ES_300, DeviceFeatures::empty()),
    );
    assert_eq!(ctx.precompile(&RenderConfig::default()), Ok(0));
}
