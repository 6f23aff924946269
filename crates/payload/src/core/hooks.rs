//! Before/after notification points around payload operations.
//!
//! The payload layer never calls interceptors itself. A request layer wraps
//! its calls into the store with [`intercept`] so auditing code sees the
//! resource type, logical id and version of each operation.

use std::fmt;
use std::future::Future;

use crate::address::PayloadAddress;
use crate::error::PayloadResult;

/// The kind of operation being bracketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadOperation {
    /// A new resource.
    Create,
    /// A new version of an existing resource.
    Update,
    /// A delete or erase.
    Delete,
    /// A read.
    Read,
}

impl fmt::Display for PayloadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadOperation::Create => write!(f, "create"),
            PayloadOperation::Update => write!(f, "update"),
            PayloadOperation::Delete => write!(f, "delete"),
            PayloadOperation::Read => write!(f, "read"),
        }
    }
}

/// Context handed to interceptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHookContext {
    /// The operation.
    pub operation: PayloadOperation,
    /// Resource type id.
    pub resource_type_id: u32,
    /// Logical id.
    pub logical_id: String,
    /// Version, when the operation targets one.
    pub version: Option<u32>,
}

impl PayloadHookContext {
    /// Builds the context of an operation on one stored payload.
    pub fn for_address(operation: PayloadOperation, address: &PayloadAddress) -> Self {
        Self {
            operation,
            resource_type_id: address.resource_type_id(),
            logical_id: address.logical_id().to_string(),
            version: Some(address.version()),
        }
    }
}

/// Receives notifications around payload operations.
///
/// Both methods default to no-ops. Returning an error from `before` vetoes
/// the operation.
pub trait PayloadInterceptor: Send + Sync {
    /// Called before the operation runs.
    fn before(&self, _context: &PayloadHookContext) -> PayloadResult<()> {
        Ok(())
    }

    /// Called after the operation finished, with whether it succeeded.
    fn after(&self, _context: &PayloadHookContext, _succeeded: bool) {}
}

/// Interceptor that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl PayloadInterceptor for NoopInterceptor {}

/// Runs `call` between the interceptor's `before` and `after` points.
pub async fn intercept<T, F, Fut>(
    interceptor: &dyn PayloadInterceptor,
    context: &PayloadHookContext,
    call: F,
) -> PayloadResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = PayloadResult<T>>,
{
    interceptor.before(context)?;
    let result = call().await;
    interceptor.after(context, result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvariantViolation, PayloadError};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
        veto: bool,
    }

    impl PayloadInterceptor for Recording {
        fn before(&self, context: &PayloadHookContext) -> PayloadResult<()> {
            self.events
                .lock()
                .push(format!("before {} {}", context.operation, context.logical_id));
            if self.veto {
                return Err(InvariantViolation::Journal {
                    message: "vetoed".to_string(),
                }
                .into());
            }
            Ok(())
        }

        fn after(&self, context: &PayloadHookContext, succeeded: bool) {
            self.events
                .lock()
                .push(format!("after {} {}", context.operation, succeeded));
        }
    }

    #[tokio::test]
    async fn test_intercept_brackets_call() {
        let address = PayloadAddress::new(1, "p1", 1, "k1").unwrap();
        let context = PayloadHookContext::for_address(PayloadOperation::Create, &address);
        let interceptor = Recording::default();

        let value = intercept(&interceptor, &context, || async { Ok::<_, PayloadError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(
            *interceptor.events.lock(),
            vec!["before create p1".to_string(), "after create true".to_string()]
        );
    }

    #[tokio::test]
    async fn test_before_error_skips_call() {
        let address = PayloadAddress::new(1, "p1", 1, "k1").unwrap();
        let context = PayloadHookContext::for_address(PayloadOperation::Delete, &address);
        let interceptor = Recording {
            veto: true,
            ..Default::default()
        };

        let mut ran = false;
        let result = intercept(&interceptor, &context, || {
            ran = true;
            async { Ok::<_, PayloadError>(()) }
        })
        .await;
        assert!(result.is_err());
        assert!(!ran);
        assert_eq!(interceptor.events.lock().len(), 1);
    }
}
