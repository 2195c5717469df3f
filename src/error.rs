use std::any::Any;

/// Why a job didn't produce its result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job's function panicked.
    #[error("job panicked: {message}")]
    Panicked { message: String },
    /// The scheduler was stopped before the job started.
    #[error("job was abandoned before it could run")]
    Abandoned,
}

impl JobError {
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        JobError::Panicked { message }
    }
}

#[test]
fn panic_messages() {
    let err = std::panic::catch_unwind(|| panic!("oh no")).unwrap_err();
    assert_eq!(JobError::from_panic(&*err), JobError::Panicked { message: "oh no".to_string() });

    let err = std::panic::catch_unwind(|| panic!("{} {}", 4, 2)).unwrap_err();
    assert_eq!(JobError::from_panic(&*err).to_string(), "job panicked: 4 2");

    let err = std::panic::catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
    assert_eq!(JobError::from_panic(&*err), JobError::Panicked { message: "Box<dyn Any>".to_string() });
}
