use super::convert::task_id_from_key;
use super::convert::task_key;
use crate::ConvertError;

#[test]
fn test_task_key_round_trip() {
    for id in [0u64, 1, 42, u64::MAX] {
        let key = task_key(id);
        assert_eq!(task_id_from_key(&key).unwrap(), id);
    }
}

#[test]
fn test_task_key_preserves_order() {
    assert!(task_key(1) < task_key(2));
    assert!(task_key(255) < task_key(256));
}

#[test]
fn test_task_id_from_key_rejects_bad_length() {
    let err = task_id_from_key(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, ConvertError::InvalidLength(3)));
}
