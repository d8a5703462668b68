use lastmile_domain::{AssignmentError, TransitionError};
use lastmile_errors::LastMileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Backend(#[from] LastMileError),
    #[error("包裹未找到: {0}")]
    DeliveryNotFound(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
