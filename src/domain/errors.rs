//! Error types
//!
//! [`NativeError`] is what the native Bluetooth stack reports; [`BridgeError`]
//! is what script callbacks receive. Native codes are translated with
//! [`BridgeError::from_native`].

use thiserror::Error;

/// Base of the platform's Bluetooth error class.
const BLUETOOTH_ERROR_CLASS: i32 = -0x01C0_0000;
/// Base of the platform's generic error class.
const PLATFORM_ERROR_CLASS: i32 = -0x4000_0000;

/// Failure codes reported by the native Bluetooth stack.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeError {
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Bluetooth device is busy")]
    ResourceBusy,
    #[error("Timeout error")]
    TimedOut,
    #[error("Operation now in progress")]
    NowInProgress,
    #[error("Not Supported")]
    NotSupported,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Quota exceeded")]
    QuotaExceeded,
    #[error("Local adapter not initialized")]
    NotInitialized,
    #[error("Local adapter not enabled")]
    NotEnabled,
    #[error("Operation already done")]
    AlreadyDone,
    #[error("Operation failed")]
    OperationFailed,
    #[error("Operation not in progress")]
    NotInProgress,
    #[error("Remote device not bonded")]
    RemoteDeviceNotBonded,
    #[error("Authentication rejected")]
    AuthRejected,
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Remote device not found")]
    RemoteDeviceNotFound,
    #[error("Service search failed")]
    ServiceSearchFailed,
    #[error("Remote device is not connected")]
    RemoteDeviceNotConnected,
    #[error("Resource temporarily unavailable")]
    Again,
    #[error("Service Not Found")]
    ServiceNotFound,
    #[error("Unknown Error")]
    Other(i32),
}

/// Result of a native call or the status carried by a native event.
pub type NativeResult<T = ()> = Result<T, NativeError>;

const CODE_TABLE: &[(NativeError, i32)] = &[
    (NativeError::Cancelled, -125),
    (NativeError::InvalidParameter, -22),
    (NativeError::OutOfMemory, -12),
    (NativeError::ResourceBusy, -16),
    (NativeError::TimedOut, PLATFORM_ERROR_CLASS | 0x0001),
    (NativeError::NowInProgress, -115),
    (NativeError::NotSupported, PLATFORM_ERROR_CLASS | 0x0002),
    (NativeError::PermissionDenied, -13),
    (NativeError::QuotaExceeded, -122),
    (NativeError::NotInitialized, BLUETOOTH_ERROR_CLASS | 0x0101),
    (NativeError::NotEnabled, BLUETOOTH_ERROR_CLASS | 0x0102),
    (NativeError::AlreadyDone, BLUETOOTH_ERROR_CLASS | 0x0103),
    (NativeError::OperationFailed, BLUETOOTH_ERROR_CLASS | 0x0104),
    (NativeError::NotInProgress, BLUETOOTH_ERROR_CLASS | 0x0105),
    (NativeError::RemoteDeviceNotBonded, BLUETOOTH_ERROR_CLASS | 0x0106),
    (NativeError::AuthRejected, BLUETOOTH_ERROR_CLASS | 0x0107),
    (NativeError::AuthFailed, BLUETOOTH_ERROR_CLASS | 0x0108),
    (NativeError::RemoteDeviceNotFound, BLUETOOTH_ERROR_CLASS | 0x0109),
    (NativeError::ServiceSearchFailed, BLUETOOTH_ERROR_CLASS | 0x010A),
    (NativeError::RemoteDeviceNotConnected, BLUETOOTH_ERROR_CLASS | 0x010B),
    (NativeError::Again, BLUETOOTH_ERROR_CLASS | 0x010C),
    (NativeError::ServiceNotFound, BLUETOOTH_ERROR_CLASS | 0x010D),
];

impl NativeError {
    /// Raw platform code for this error.
    pub fn code(&self) -> i32 {
        if let NativeError::Other(code) = self {
            return *code;
        }
        CODE_TABLE
            .iter()
            .find(|(error, _)| error == self)
            .map(|(_, code)| *code)
            .unwrap_or(PLATFORM_ERROR_CLASS)
    }

    /// Translate a raw platform code. `0` is success.
    pub fn from_code(code: i32) -> NativeResult {
        if code == 0 {
            return Ok(());
        }
        let error = CODE_TABLE
            .iter()
            .find(|(_, raw)| *raw == code)
            .map(|(error, _)| *error)
            .unwrap_or(NativeError::Other(code));
        Err(error)
    }
}

/// Error categories visible to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServiceNotAvailable,
    AlreadyInProgress,
    InvalidValues,
    NotFound,
    QuotaExceeded,
    Unknown,
}

/// Error delivered to a script error callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("ServiceNotAvailableError: {0}")]
    ServiceNotAvailable(String),
    #[error("AlreadyInProgressError: {0}")]
    AlreadyInProgress(String),
    #[error("InvalidValuesError: {0}")]
    InvalidValues(String),
    #[error("NotFoundError: {0}")]
    NotFound(String),
    #[error("QuotaExceededError: {0}")]
    QuotaExceeded(String),
    #[error("UnknownError: {0}")]
    Unknown(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ServiceNotAvailable(_) => ErrorKind::ServiceNotAvailable,
            BridgeError::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            BridgeError::InvalidValues(_) => ErrorKind::InvalidValues,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            BridgeError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Script-facing error name.
    pub fn name(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ServiceNotAvailable => "ServiceNotAvailableError",
            ErrorKind::AlreadyInProgress => "AlreadyInProgressError",
            ErrorKind::InvalidValues => "InvalidValuesError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::QuotaExceeded => "QuotaExceededError",
            ErrorKind::Unknown => "UnknownError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BridgeError::ServiceNotAvailable(m)
            | BridgeError::AlreadyInProgress(m)
            | BridgeError::InvalidValues(m)
            | BridgeError::NotFound(m)
            | BridgeError::QuotaExceeded(m)
            | BridgeError::Unknown(m) => m,
        }
    }

    pub fn powered_off() -> Self {
        BridgeError::ServiceNotAvailable("Bluetooth device is turned off".to_string())
    }

    /// Translate a native failure, prefixing `hint` to the native message.
    pub fn from_native(error: NativeError, hint: &str) -> Self {
        let message = format!("{} : {}", hint, error);
        match error {
            NativeError::ResourceBusy | NativeError::NowInProgress | NativeError::NotEnabled => {
                BridgeError::ServiceNotAvailable(message)
            }
            NativeError::RemoteDeviceNotFound => BridgeError::NotFound(message),
            NativeError::InvalidParameter => BridgeError::InvalidValues(message),
            NativeError::QuotaExceeded => BridgeError::QuotaExceeded(message),
            NativeError::Other(code) => BridgeError::Unknown(format!("{} (code {})", message, code)),
            _ => BridgeError::Unknown(message),
        }
    }
}
