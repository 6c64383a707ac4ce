/// Point-in-time view of a client's limiter.
///
/// Reading it refills the bucket, so it advances the limiter clock like any
/// other limiter call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientStats {
    pub available_tokens: f64,
    /// `available_tokens / capacity`, in `[0, 1]`.
    pub fill_ratio: f64,
}
