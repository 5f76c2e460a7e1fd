//! Streaming-generation protocol: conflict handling, teardown ordering,
//! early abandonment, marshaling accounting.

use std::sync::Arc;

use lmx_core::{GenerateOptions, LmxError, Model, Runtime, StopMode};
use lmx_native::NativeApi;
use lmx_native::fake::{FakeRuntime, kind};

fn runtime() -> (Arc<FakeRuntime>, Runtime) {
    let fake = Arc::new(FakeRuntime::new());
    let api: Arc<dyn NativeApi> = fake.clone();
    let runtime = Runtime::new(api).unwrap();
    (fake, runtime)
}

fn model(rt: &Runtime) -> Model {
    Model::load(rt, "/models/test").unwrap()
}

#[test]
fn full_generation_echoes_prompt() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    let stream = model
        .generate("the quick brown fox", &GenerateOptions::default())
        .unwrap();
    assert!(model.is_generating());
    let text = stream.into_text().unwrap();
    assert_eq!(text, "the quick brown fox ");

    assert!(!model.is_generating());
    assert!(!fake.any_generation_active());
    assert_eq!(fake.allocated(kind::GENERATION), fake.freed(kind::GENERATION));
}

#[test]
fn fragments_form_prefixes_across_early_stops() {
    let (_fake, rt) = runtime();
    let model = model(&rt);
    let options = GenerateOptions::default();

    let full: Vec<String> = model
        .generate("alpha beta gamma delta", &options)
        .unwrap()
        .map(|f| f.unwrap())
        .collect();
    assert_eq!(full.len(), 4);

    for k in 1..=full.len() {
        let partial: Vec<String> = model
            .generate("alpha beta gamma delta", &options)
            .unwrap()
            .take(k)
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(partial, full[..k]);
    }
}

#[test]
fn second_generation_while_active_is_conflict() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    let mut stream = model.generate("one two three", &GenerateOptions::default()).unwrap();
    stream.next().unwrap().unwrap();
    assert_eq!(fake.calls("generation_start"), 1);

    let err = model
        .generate("four", &GenerateOptions::default())
        .unwrap_err();
    assert!(matches!(err, LmxError::GenerationActive));
    // The conflict was detected before any native call.
    assert_eq!(fake.calls("generation_start"), 1);
    drop(stream);

    // Teardown made the model reusable.
    let text = model
        .generate("four", &GenerateOptions::default())
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "four ");
}

#[test]
fn abandoning_a_stream_clears_the_active_flag() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    {
        let mut stream = model
            .generate("one two three four", &GenerateOptions::default())
            .unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), "one ");
        // Never reaches done=true.
    }

    assert!(!model.is_generating());
    assert!(!fake.any_generation_active());
    assert_eq!(fake.allocated(kind::GENERATION), fake.freed(kind::GENERATION));

    let text = model
        .generate("again", &GenerateOptions::default())
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "again ");
}

#[test]
fn failed_start_leaves_model_inactive() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    fake.inject_failure("generation_start", 55);
    let err = model
        .generate("hello", &GenerateOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        LmxError::Native {
            op: "generation_start",
            code: 55
        }
    ));
    assert!(!model.is_generating());
    assert!(!fake.any_generation_active());

    // The marshaled params block was still released.
    assert_eq!(fake.allocated(kind::PARAMS), fake.freed(kind::PARAMS));
}

#[test]
fn failed_start_frees_partial_generation_handle() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    fake.inject_failure_with_partial("generation_start", 55);
    assert!(model.generate("hello", &GenerateOptions::default()).is_err());
    assert_eq!(fake.allocated(kind::GENERATION), 1);
    assert_eq!(fake.freed(kind::GENERATION), 1);
}

#[test]
fn marshal_releases_every_stop_string() {
    let (fake, rt) = runtime();
    let model = model(&rt);
    let options = GenerateOptions {
        stop_sequences: vec!["alpha".into(), "beta".into(), "gamma".into()],
        ..Default::default()
    };

    model
        .generate("no stops here", &options)
        .unwrap()
        .into_text()
        .unwrap();

    // Every native string (stop sequences + fragments) was released, as was
    // the parameter block.
    assert_eq!(fake.allocated(kind::STRING), fake.freed(kind::STRING));
    assert_eq!(fake.allocated(kind::PARAMS), fake.freed(kind::PARAMS));
}

#[test]
fn invalid_options_fail_before_any_native_call() {
    let (fake, rt) = runtime();
    let model = model(&rt);
    let options = GenerateOptions {
        temperature: -0.5,
        ..Default::default()
    };

    let err = model.generate("hello", &options).unwrap_err();
    assert!(matches!(err, LmxError::InvalidArgument(_)));
    assert_eq!(fake.calls("generate_params_new"), 0);
    assert_eq!(fake.calls("generation_start"), 0);
}

#[test]
fn empty_prompt_is_rejected() {
    let (fake, rt) = runtime();
    let model = model(&rt);
    let err = model.generate("", &GenerateOptions::default()).unwrap_err();
    assert!(matches!(err, LmxError::InvalidArgument(_)));
    assert_eq!(fake.calls("generation_start"), 0);
}

#[test]
fn stop_sequence_truncate_and_include_modes() {
    let (_fake, rt) = runtime();
    let model = model(&rt);

    let truncate = GenerateOptions {
        stop_sequences: vec!["brave".into()],
        stop_mode: StopMode::Truncate,
        ..Default::default()
    };
    let text = model
        .generate("hello brave world", &truncate)
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "hello ");

    let include = GenerateOptions {
        stop_sequences: vec!["brave".into()],
        stop_mode: StopMode::Include,
        ..Default::default()
    };
    let text = model
        .generate("hello brave world", &include)
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "hello brave");
}

#[test]
fn max_tokens_caps_fragment_count() {
    let (_fake, rt) = runtime();
    let model = model(&rt);
    let options = GenerateOptions {
        max_tokens: 2,
        ..Default::default()
    };
    let text = model
        .generate("one two three four", &options)
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "one two ");
}

#[test]
fn free_failure_surfaces_after_final_fragment() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    fake.inject_failure("generation_free", 9);
    let mut stream = model.generate("hi", &GenerateOptions::default()).unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), "hi ");
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        LmxError::Native {
            op: "generation_free",
            code: 9
        }
    ));
    assert!(stream.next().is_none());
    // The model flag is cleared even when free fails.
    assert!(!model.is_generating());
}

#[test]
fn cancel_failure_is_suppressed_and_free_still_runs() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    fake.inject_failure("generation_cancel", 8);
    let text = model
        .generate("hi there", &GenerateOptions::default())
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(text, "hi there ");

    assert!(!model.is_generating());
    assert_eq!(fake.allocated(kind::GENERATION), fake.freed(kind::GENERATION));
}

#[test]
fn error_during_polling_tears_down_and_propagates() {
    let (fake, rt) = runtime();
    let model = model(&rt);

    let mut stream = model
        .generate("one two three", &GenerateOptions::default())
        .unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), "one ");

    fake.inject_failure("generation_next", 77);
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        LmxError::Native {
            op: "generation_next",
            code: 77
        }
    ));
    assert!(stream.next().is_none());
    assert!(!model.is_generating());
    assert!(!fake.any_generation_active());
    assert_eq!(fake.allocated(kind::GENERATION), fake.freed(kind::GENERATION));
}
