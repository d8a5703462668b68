use lastmile_errors::LastMileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("当前设备未登录")]
    NotLoggedIn,
    #[error("扫码内容为空")]
    EmptyScan,
    #[error(transparent)]
    Backend(#[from] LastMileError),
}

pub type CourierResult<T> = Result<T, CourierError>;
