//! Program / Pipeline Integration Tests
//!
//! Tests for:
//! - Linked path: stage-owned uniform values, lazy sync, relink on stage swap
//! - Separable path: per-stage programs, immediate uniform updates
//! - Stage destruction detaching from every pipeline
//! - Uniforms declared by both stages, or in declarator lists
//! - Device generation: stale handles are rejected without touching the device

use glam::{Mat4, Vec4};
use myth_shader_cache::pipeline::shader_gen::{default_fragment_source, default_vertex_source};
use myth_shader_cache::{
    CacheSettings, Capabilities, ContextSettings, DeviceFeatures, FixedUniform, GlslVersion,
    RecordingDevice, RenderConfig, ShaderContext, ShaderError, ShaderGenerator, ShaderStage,
    UniformType, UniformValue,
};

const VERTEX: &str = "\
uniform highp mat4 transform;
attribute highp vec4 a_position;
void main() { gl_Position = transform * a_position; }
";

const RED: &str = "\
uniform lowp vec4 tint;
void main() { color_out = tint; }
";

const GREEN: &str = "\
uniform lowp vec4 tint;
uniform lowp float strength;
void main() { color_out = tint * strength; }
";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn linked_context() -> ShaderContext<RecordingDevice> {
    init_logger();
    ShaderContext::new(
        RecordingDevice::new(),
        Capabilities::new(GlslVersion::ES_300, DeviceFeatures::empty()),
        ContextSettings::default(),
    )
}

fn separable_context() -> ShaderContext<RecordingDevice> {
    init_logger();
    ShaderContext::new(
        RecordingDevice::new(),
        Capabilities::new(GlslVersion::GL_410, DeviceFeatures::SEPARABLE_PROGRAMS),
        ContextSettings::default(),
    )
}

fn mat(scale: f32) -> UniformValue {
    UniformValue::Mat4(Mat4::from_scale(glam::Vec3::splat(scale)))
}

// ============================================================================
// Linked path
// ============================================================================

#[test]
fn linked_uniforms_follow_the_stage_into_every_program() {
    let mut ctx = linked_context();
    assert!(!ctx.is_separable());

    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let red = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let green = ctx.create_stage(ShaderStage::Fragment, GREEN).unwrap();
    let first = ctx.create_pipeline(Some(vs), Some(red)).unwrap();
    let second = ctx.create_pipeline(Some(vs), Some(green)).unwrap();

    ctx.bind_pipeline(Some(first)).unwrap();
    let first_program = ctx.device().current_program().unwrap();
    ctx.set_stage_uniform(vs, "transform", mat(2.0)).unwrap();
    assert_eq!(
        ctx.device().uniform_value(first_program, "transform"),
        Some(mat(2.0))
    );

    // The value was stored on the stage and reaches the other program on bind.
    ctx.bind_pipeline(Some(second)).unwrap();
    let second_program = ctx.device().current_program().unwrap();
    assert_ne!(first_program, second_program);
    assert_eq!(
        ctx.device().uniform_value(second_program, "transform"),
        Some(mat(2.0))
    );
    assert_eq!(ctx.registry().stored_uniform(vs, "transform"), Some(mat(2.0)));
}

#[test]
fn linked_sync_only_pushes_changed_values() {
    let mut ctx = linked_context();
    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let fs = ctx.create_stage(ShaderStage::Fragment, GREEN).unwrap();
    let other_fs = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let pipeline = ctx.create_pipeline(Some(vs), Some(fs)).unwrap();
    let other = ctx.create_pipeline(Some(vs), Some(other_fs)).unwrap();

    ctx.bind_pipeline(Some(pipeline)).unwrap();
    ctx.set_stage_uniform(vs, "transform", mat(1.0)).unwrap();
    ctx.set_stage_uniform(fs, "tint", UniformValue::Vec4(Vec4::ONE)).unwrap();
    ctx.set_stage_uniform(fs, "strength", UniformValue::Float(0.5)).unwrap();
    assert_eq!(ctx.device().counters.uniform_calls, 3);

    // Same value again: no store generation bump, no upload.
    ctx.set_stage_uniform(fs, "strength", UniformValue::Float(0.5)).unwrap();
    assert_eq!(ctx.device().counters.uniform_calls, 3);

    // Switching away and back pushes nothing: both stages are in sync.
    ctx.bind_pipeline(Some(other)).unwrap();
    let after_other = ctx.device().counters.uniform_calls;
    assert_eq!(after_other, 4); // `transform` into the other program
    ctx.bind_pipeline(Some(pipeline)).unwrap();
    assert_eq!(ctx.device().counters.uniform_calls, after_other);

    // A change made while another pipeline is bound is pushed lazily.
    ctx.bind_pipeline(Some(other)).unwrap();
    ctx.set_stage_uniform(vs, "transform", mat(3.0)).unwrap();
    let before = ctx.device().counters.uniform_calls;
    ctx.bind_pipeline(Some(pipeline)).unwrap();
    assert_eq!(ctx.device().counters.uniform_calls, before + 1);
}

#[test]
fn swapping_a_linked_stage_relinks_on_next_bind() {
    let mut ctx = linked_context();
    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let red = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let green = ctx.create_stage(ShaderStage::Fragment, GREEN).unwrap();
    let pipeline = ctx.create_pipeline(Some(vs), Some(red)).unwrap();
    ctx.set_stage_uniform(green, "strength", UniformValue::Float(0.25)).unwrap();
    assert_eq!(ctx.device().counters.links, 1);

    ctx.attach_stage(pipeline, ShaderStage::Fragment, Some(green)).unwrap();
    assert_eq!(ctx.device().counters.programs_deleted, 1);
    assert_eq!(ctx.registry().stage_users(red), Some(&[][..]));

    assert!(ctx.bind_pipeline(Some(pipeline)).unwrap());
    assert_eq!(ctx.device().counters.links, 2);
    let program = ctx.device().current_program().unwrap();
    assert_eq!(
        ctx.device().uniform_value(program, "strength"),
        Some(UniformValue::Float(0.25))
    );
}

#[test]
fn attaching_a_stage_of_the_wrong_kind_is_rejected() {
    let mut ctx = linked_context();
    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let fs = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let pipeline = ctx.create_pipeline(Some(vs), Some(fs)).unwrap();
    assert!(ctx.attach_stage(pipeline, ShaderStage::Fragment, Some(vs)).is_err());
    assert!(ctx.create_pipeline(Some(fs), None).is_err());
}

// ============================================================================
// Separable path
// ============================================================================

#[test]
fn separable_programs_are_built_per_stage() {
    let mut ctx = separable_context();
    assert!(ctx.is_separable());

    let selection = ctx.select_program(&RenderConfig::default()).unwrap();
    assert!(selection.changed);

    let device = ctx.device();
    let pipeline = device.current_pipeline().unwrap();
    let [vertex, fragment] = device.pipeline_stages(pipeline).unwrap();
    assert!(device.is_separable(vertex.unwrap()));
    assert!(device.is_separable(fragment.unwrap()));
    assert_eq!(device.counters.pipelines_created, 1);
    // Intermediate shader objects are gone.
    assert_eq!(device.live_shaders(), 0);
    assert_eq!(device.live_programs(), 2);

    assert_eq!(
        ctx.active_attributes().map(|a| a.position),
        Some(Some(0))
    );
}

#[test]
fn separable_uniforms_are_set_immediately() {
    let mut ctx = separable_context();
    ctx.select_program(&RenderConfig::default()).unwrap();
    let pipeline = ctx.device().current_pipeline().unwrap();
    let vertex = ctx.device().pipeline_stages(pipeline).unwrap()[0].unwrap();

    assert_eq!(ctx.set_fixed_uniform(FixedUniform::Transform, mat(4.0)), Ok(true));
    assert_eq!(ctx.device().counters.program_uniform_calls, 1);
    assert_eq!(ctx.device().counters.uniform_calls, 0);
    assert_eq!(ctx.device().uniform_value(vertex, "transform"), Some(mat(4.0)));
}

#[test]
fn destroying_a_shared_stage_detaches_it_everywhere() {
    let mut ctx = separable_context();
    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let red = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let green = ctx.create_stage(ShaderStage::Fragment, GREEN).unwrap();
    let first = ctx.create_pipeline(Some(vs), Some(red)).unwrap();
    let second = ctx.create_pipeline(Some(vs), Some(green)).unwrap();

    ctx.bind_pipeline(Some(first)).unwrap();
    let native_first = ctx.device().current_pipeline().unwrap();
    ctx.bind_pipeline(Some(second)).unwrap();
    let native_second = ctx.device().current_pipeline().unwrap();
    assert_eq!(ctx.registry().stage_users(vs).map(<[_]>::len), Some(2));

    ctx.destroy_stage(vs).unwrap();
    for native in [native_first, native_second] {
        let [vertex, fragment] = ctx.device().pipeline_stages(native).unwrap();
        assert_eq!(vertex, None);
        assert!(fragment.is_some());
    }
    assert_eq!(ctx.registry().pipeline_stages(first), Some([None, Some(red)]));
    assert_eq!(ctx.device().counters.invalid_calls, 0);
}

#[test]
fn separable_uniform_declared_by_both_stages_reaches_both_programs() {
    let mut ctx = separable_context();
    let generator = ShaderGenerator::default()
        .with_vertex_source(|c| format!("uniform lowp vec4 tint;\n{}", default_vertex_source(c)))
        .with_fragment_source(|c| {
            format!("uniform lowp vec4 tint;\n{}", default_fragment_source(c))
        });
    ctx.set_generator(Some(generator), CacheSettings::default());
    let tint = ctx.register_user_uniform("tint", UniformType::Vec4).unwrap();

    ctx.select_program(&RenderConfig::default()).unwrap();
    assert_eq!(ctx.set_user_uniform(tint, UniformValue::Vec4(Vec4::ONE)), Ok(true));

    let pipeline = ctx.device().current_pipeline().unwrap();
    let [vertex, fragment] = ctx.device().pipeline_stages(pipeline).unwrap();
    for program in [vertex.unwrap(), fragment.unwrap()] {
        assert_eq!(
            ctx.device().uniform_value(program, "tint"),
            Some(UniformValue::Vec4(Vec4::ONE))
        );
    }
    assert_eq!(ctx.device().counters.program_uniform_calls, 2);
}

#[test]
fn linked_uniform_in_a_declarator_list_belongs_to_its_stage() {
    let mut ctx = linked_context();
    let generator = ShaderGenerator::default().with_fragment_source(|c| {
        format!("uniform lowp vec4 tint, shade;\n{}", default_fragment_source(c))
    });
    ctx.set_generator(Some(generator), CacheSettings::default());
    let tint = ctx.register_user_uniform("tint", UniformType::Vec4).unwrap();

    let selection = ctx.select_program(&RenderConfig::default()).unwrap();
    assert_eq!(ctx.set_user_uniform(tint, UniformValue::Vec4(Vec4::ONE)), Ok(true));

    let [vertex, fragment] = ctx.registry().pipeline_stages(selection.pipeline).unwrap();
    assert_eq!(
        ctx.registry().stored_uniform(fragment.unwrap(), "tint"),
        Some(UniformValue::Vec4(Vec4::ONE))
    );
    assert_eq!(ctx.registry().stored_uniform(vertex.unwrap(), "tint"), None);
    let program = ctx.device().current_program().unwrap();
    assert_eq!(
        ctx.device().uniform_value(program, "tint"),
        Some(UniformValue::Vec4(Vec4::ONE))
    );
}

#[test]
fn cached_pipelines_cannot_be_edited_directly() {
    let mut ctx = separable_context();
    let selection = ctx.select_program(&RenderConfig::default()).unwrap();
    assert_eq!(
        ctx.destroy_pipeline(selection.pipeline),
        Err(ShaderError::CacheOwned)
    );
    assert_eq!(
        ctx.attach_stage(selection.pipeline, ShaderStage::Vertex, None),
        Err(ShaderError::CacheOwned)
    );
}

// ============================================================================
// Device generation
// ============================================================================

#[test]
fn stale_handles_are_rejected_without_device_calls() {
    let mut ctx = linked_context();
    ctx.select_program(&RenderConfig::default()).unwrap();
    let vs = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    let fs = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    let pipeline = ctx.create_pipeline(Some(vs), Some(fs)).unwrap();
    let generation = ctx.generation();

    ctx.device_mut().lose_context();
    let before = ctx.device().counters;
    ctx.notify_context_lost();

    assert!(ctx.generation() > generation);
    assert_eq!(ctx.cache_stats().occupied, 0);
    assert_eq!(ctx.device().counters, before);

    assert_eq!(
        ctx.set_stage_uniform(vs, "transform", mat(1.0)),
        Err(ShaderError::StaleHandle("stage"))
    );
    assert_eq!(
        ctx.bind_pipeline(Some(pipeline)),
        Err(ShaderError::StaleHandle("pipeline"))
    );
    ctx.destroy_pipeline(pipeline).unwrap();
    ctx.destroy_stage(vs).unwrap();
    ctx.destroy_stage(fs).unwrap();
    assert_eq!(ctx.device().counters, before);
    assert_eq!(ctx.registry().stage_count(), 0);
    assert_eq!(ctx.registry().pipeline_count(), 0);

    // Objects created after the bump work normally.
    let selection = ctx.select_program(&RenderConfig::default()).unwrap();
    assert!(selection.changed);
    assert_eq!(ctx.set_fixed_uniform(FixedUniform::Transform, mat(2.0)), Ok(true));
    let program = ctx.device().current_program().unwrap();
    assert_eq!(ctx.device().uniform_value(program, "transform"), Some(mat(2.0)));
    assert_eq!(ctx.device().counters.invalid_calls, 0);
}

#[test]
fn stale_stage_cannot_join_a_new_pipeline() {
    let mut ctx = separable_context();
    let old = ctx.create_stage(ShaderStage::Vertex, VERTEX).unwrap();
    ctx.device_mut().lose_context();
    ctx.notify_context_lost();

    let fresh = ctx.create_stage(ShaderStage::Fragment, RED).unwrap();
    assert_eq!(
        ctx.create_pipeline(Some(old), Some(fresh)),
        Err(ShaderError::StaleHandle("stage"))
    );
    assert!(ctx.create_pipeline(None, Some(fresh)).is_ok());
}

#[test]
fn release_for_context_change_deletes_everything_first() {
    let mut ctx = linked_context();
    ctx.select_program(&RenderConfig::default()).unwrap();
    ctx.select_program(&RenderConfig {
        fog: true,
        ..Default::default()
    })
    .unwrap();
    let generation = ctx.generation();

    ctx.release_for_context_change();
    let counters = ctx.device().counters;
    assert_eq!(counters.programs_deleted, 2);
    assert_eq!(counters.shaders_deleted, 4);
    assert_eq!(ctx.device().live_programs(), 0);
    assert!(ctx.generation() > generation);
    assert_eq!(ctx.current_key(), None);
}

#[test]
fn replace_device_switches_program_mode() {
    let mut ctx = linked_context();
    ctx.select_program(&RenderConfig::default()).unwrap();

    let old = ctx.replace_device(
        RecordingDevice::new(),
        Capabilities::new(GlslVersion::GL_410, DeviceFeatures::SEPARABLE_PROGRAMS),
    );
    assert_eq!(old.counters.programs_deleted, 0);
    assert!(ctx.is_separable());

    ctx.select_program(&RenderConfig::default()).unwrap();
    assert_eq!(ctx.device().counters.pipelines_created, 1);
    assert_eq!(ctx.device().counters.invalid_calls, 0);
}
