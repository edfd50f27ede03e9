//! Errors returned by the signaling client.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Connecting to a cell channel failed.
#[derive(Debug)]
pub struct ConnectError {
    pub(crate) kind: ConnectErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConnectError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ConnectErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ConnectErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConnectErrorType::Establishing => f.write_str("establishing the connection failed"),
            ConnectErrorType::UrlInvalid { url } => {
                f.write_str("cell channel url is invalid: ")?;

                f.write_str(url)
            }
        }
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`ConnectError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectErrorType {
    /// Establishing the connection to the cell failed.
    Establishing,
    /// Provided cell channel URL is invalid.
    UrlInvalid {
        /// The URL as provided.
        url: String,
    },
}

/// Sending a frame over the cell channel failed.
#[derive(Debug)]
pub struct SendError {
    pub(crate) kind: SendErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl SendError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &SendErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (SendErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            SendErrorType::Sending => {
                f.write_str("sending the frame failed because the channel is closed")
            }
            SendErrorType::Serializing => f.write_str("serializing the frame as json failed"),
        }
    }
}

impl Error for SendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`SendError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum SendErrorType {
    /// The channel has closed and the frame can't be enqueued.
    Sending,
    /// The frame failed to serialize as JSON.
    Serializing,
}

#[cfg(test)]
mod tests {
    use super::{ConnectError, ConnectErrorType, SendError, SendErrorType};
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{error::Error, fmt::Debug};

    assert_fields!(ConnectErrorType::UrlInvalid: url);
    assert_impl_all!(ConnectErrorType: Debug, Send, Sync);
    assert_impl_all!(ConnectError: Error, Send, Sync);
    assert_impl_all!(SendErrorType: Debug, Send, Sync);
    assert_impl_all!(SendError: Error, Send, Sync);
}
