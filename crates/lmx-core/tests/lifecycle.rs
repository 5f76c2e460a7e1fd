//! Handle lifecycle: acquisition, disposal, use-after-dispose, host reads.

use std::sync::Arc;

use lmx_core::{Dtype, LmxError, Model, Runtime, Tensor};
use lmx_native::NativeApi;
use lmx_native::fake::{FakeRuntime, kind};

fn runtime() -> (Arc<FakeRuntime>, Runtime) {
    let fake = Arc::new(FakeRuntime::new());
    let api: Arc<dyn NativeApi> = fake.clone();
    let runtime = Runtime::new(api).unwrap();
    (fake, runtime)
}

#[test]
fn tensor_dispose_is_idempotent() {
    let (fake, rt) = runtime();
    let mut t = Tensor::from_slice(&rt, &[1.0, 2.0], &[2]).unwrap();
    t.dispose().unwrap();
    t.dispose().unwrap();
    assert_eq!(fake.freed(kind::ARRAY), 1);
}

#[test]
fn every_tensor_accessor_fails_after_dispose() {
    let (_fake, rt) = runtime();
    let mut t = Tensor::from_slice(&rt, &[1.0], &[1]).unwrap();
    t.dispose().unwrap();

    assert!(matches!(t.size(), Err(LmxError::InvalidState(_))));
    assert!(matches!(t.shape(), Err(LmxError::InvalidState(_))));
    assert!(matches!(t.dtype(), Err(LmxError::InvalidState(_))));
    assert!(matches!(t.itemsize(), Err(LmxError::InvalidState(_))));
    assert!(matches!(t.as_f64(), Err(LmxError::InvalidState(_))));
    assert!(matches!(t.to_host_vec(), Err(LmxError::InvalidState(_))));
}

#[test]
fn tensor_metadata_accessors() {
    let (_fake, rt) = runtime();
    let t = Tensor::from_slice(&rt, &[0.0; 6], &[2, 3]).unwrap();
    assert_eq!(t.dtype().unwrap(), Dtype::F32);
    assert_eq!(t.ndim().unwrap(), 2);
    assert_eq!(t.shape().unwrap(), vec![2, 3]);
    assert_eq!(t.size().unwrap(), 6);
    assert_eq!(t.itemsize().unwrap(), 4);
}

#[test]
fn from_slice_rejects_mismatched_shape() {
    let (_fake, rt) = runtime();
    let err = Tensor::from_slice(&rt, &[1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
    assert!(matches!(err, LmxError::InvalidArgument(_)));
}

#[test]
fn scalar_reads_require_one_element() {
    let (_fake, rt) = runtime();
    let scalar = Tensor::from_slice(&rt, &[3.5], &[1]).unwrap();
    assert_eq!(scalar.as_f64().unwrap(), 3.5);
    assert_eq!(scalar.as_i32().unwrap(), 3);
    assert!(scalar.as_bool().unwrap());

    let vector = Tensor::from_slice(&rt, &[1.0, 2.0], &[2]).unwrap();
    assert!(matches!(vector.as_f64(), Err(LmxError::InvalidState(_))));
    assert!(matches!(vector.as_i32(), Err(LmxError::InvalidState(_))));
    assert!(matches!(vector.as_bool(), Err(LmxError::InvalidState(_))));
}

#[test]
fn to_host_vec_copies_data() {
    let (_fake, rt) = runtime();
    let t = Tensor::from_slice(&rt, &[1.0, 2.0, 3.0], &[3]).unwrap();
    assert_eq!(t.to_host_vec().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn to_host_vec_converts_and_disposes_transient_copy() {
    let (fake, rt) = runtime();
    let t = Tensor::from_slice(&rt, &[1.0, 2.0], &[2]).unwrap();
    let half = t.astype(Dtype::F16).unwrap();
    assert_eq!(half.dtype().unwrap(), Dtype::F16);

    let allocated_before = fake.allocated(kind::ARRAY);
    assert_eq!(half.to_host_vec().unwrap(), vec![1.0, 2.0]);
    // Exactly one transient f32 copy was made and released.
    assert_eq!(fake.allocated(kind::ARRAY), allocated_before + 1);
    assert_eq!(fake.freed(kind::ARRAY), 1);
}

#[test]
fn null_data_pointer_is_invalid_state() {
    let (fake, rt) = runtime();
    let t = Tensor::from_slice(&rt, &[1.0, 2.0, 3.0], &[3]).unwrap();
    fake.nullify_next_array_data();
    assert!(matches!(t.to_host_vec(), Err(LmxError::InvalidState(_))));
}

#[test]
fn model_load_rejects_empty_directory() {
    let (fake, rt) = runtime();
    let err = Model::load(&rt, "").unwrap_err();
    assert!(matches!(err, LmxError::InvalidArgument(_)));
    assert_eq!(fake.calls("model_load"), 0);
}

#[test]
fn model_load_failure_propagates_native_code() {
    let (fake, rt) = runtime();
    fake.inject_failure("model_load", 12);
    let err = Model::load(&rt, "/models/test").unwrap_err();
    assert!(matches!(
        err,
        LmxError::Native {
            op: "model_load",
            code: 12
        }
    ));
}

#[test]
fn failed_model_load_frees_partial_handle() {
    let (fake, rt) = runtime();
    fake.inject_failure_with_partial("model_load", 12);
    assert!(Model::load(&rt, "/models/test").is_err());
    assert_eq!(fake.allocated(kind::MODEL), 1);
    assert_eq!(fake.freed(kind::MODEL), 1);
}

#[test]
fn tokenize_decode_round_trip() {
    let (_fake, rt) = runtime();
    let model = Model::load(&rt, "/models/test").unwrap();

    let tokens = model.tokenize("cake", true, true).unwrap();
    assert_eq!(tokens.to_vec().unwrap(), vec![1, 99, 97, 107, 101, 2]);
    assert_eq!(tokens.len().unwrap(), 6);
    assert_eq!(tokens.get(1).unwrap(), 99);

    let text = model.decode(&tokens.to_vec().unwrap()).unwrap();
    assert_eq!(text, "cake");
}

#[test]
fn decode_frees_its_transient_string() {
    let (fake, rt) = runtime();
    let model = Model::load(&rt, "/models/test").unwrap();
    model.decode(&[104, 105]).unwrap();
    assert_eq!(fake.allocated(kind::STRING), fake.freed(kind::STRING));
}

#[test]
fn model_use_after_dispose_fails() {
    let (_fake, rt) = runtime();
    let mut model = Model::load(&rt, "/models/test").unwrap();
    model.dispose().unwrap();
    model.dispose().unwrap();
    assert!(matches!(
        model.tokenize("x", false, false),
        Err(LmxError::InvalidState(_))
    ));
    assert!(matches!(
        model.decode(&[104]),
        Err(LmxError::InvalidState(_))
    ));
}

#[test]
fn dropping_wrappers_releases_all_handles() {
    let fake = Arc::new(FakeRuntime::new());
    {
        let api: Arc<dyn NativeApi> = fake.clone();
        let rt = Runtime::new(api).unwrap();
        let _model = Model::load(&rt, "/models/test").unwrap();
        let _t = Tensor::from_slice(&rt, &[1.0], &[1]).unwrap();
        assert_eq!(fake.live_handles(), 3);
    }
    assert_eq!(fake.live_handles(), 0);
}
