use std::time::Duration;

/// What a stream does when a single inbound message cannot be decoded.
///
/// Structural errors (cancellation, connection loss) always terminate the call regardless of
/// the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecvErrPolicy {
    /// Log the malformed message and keep waiting for the next one.
    #[default]
    Continue,
    /// Return [StreamError::Decode](crate::error::StreamError::Decode) to the caller.
    Abort,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Deadline applied to a call whose context carries none. Zero means no deadline.
    pub call_timeout: Duration,
    pub recv_err_policy: RecvErrPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(0),
            recv_err_policy: RecvErrPolicy::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How long RpcServer::close() waits for connections to finish.
    pub server_close_wait: Duration,
    /// A connection sending no frame for this long is dropped. Zero means never.
    pub idle_timeout: Duration,
    pub recv_err_policy: RecvErrPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_close_wait: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            recv_err_policy: RecvErrPolicy::default(),
        }
    }
}
