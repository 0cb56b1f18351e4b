//! Cancellation as a value, not a panic.
//!
//! Cancellation is never a failure: it unwinds cleanly through `?` and must
//! not mark any file as failed. Workers poll tokens between items and the
//! scheduler races in-flight work against them.

use tokio_util::sync::CancellationToken;

/// Signal that an operation was cancelled by its token.
///
/// Distinct from every error type in this workspace so callers can never
/// confuse "stop asked for" with "something broke".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Check a token, raising [`Cancelled`] if it has been tripped.
pub fn checked(token: &CancellationToken) -> Result<(), Cancelled> {
  if token.is_cancelled() { Err(Cancelled) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_checked_reflects_token_state() {
    let token = CancellationToken::new();
    assert_eq!(checked(&token), Ok(()));

    token.cancel();
    assert_eq!(checked(&token), Err(Cancelled));
  }
}
