use alloc::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The non-volatile region could not be read or written.
    Storage,
    /// An entry does not fit into the non-volatile region.
    StorageOverflow,
    /// An entry with the same identifier has already been registered.
    DuplicateEntry,
    /// A broker operation failed.
    Broker,
    /// A wireless link operation failed.
    Wifi,
    /// The `HTTP` surface could not be started.
    Web,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Storage => "Storage",
            Self::StorageOverflow => "Storage Overflow",
            Self::DuplicateEntry => "Duplicate Entry",
            Self::Broker => "Broker",
            Self::Wifi => "Wifi",
            Self::Web => "Web",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.description().fmt(f)
    }
}

/// A library error.
#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// The reasons why a firmware update may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Not enough space to store the new image.
    NoSpace,
    /// The announced image size does not match the received bytes.
    BadSize,
    /// Writing the image into flash failed.
    WriteFailed,
    /// The written image failed verification.
    VerifyFailed,
    /// The transfer was interrupted.
    Aborted,
}

impl UpdateError {
    /// Returns the reason string reported to clients.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSpace => "Not enough space",
            Self::BadSize => "Bad size given",
            Self::WriteFailed => "Flash write failed",
            Self::VerifyFailed => "Verify failed",
            Self::Aborted => "Update aborted",
        }
    }
}

impl core::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_str().fmt(f)
    }
}
