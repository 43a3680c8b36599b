//! Seams to the query-execution engine
//!
//! The engine itself lives outside this crate. It is reached through
//! [`QueryExecutor`]; additional caching layers can sit in front of the query
//! caches by implementing [`Interceptor`].

use crate::cache::context::RequestContext;
use crate::cache::types::{ExecutionResult, Operation};
use async_trait::async_trait;

/// Executes one GraphQL operation for real
///
/// Implementations may change the context identity (for example clearing it
/// after an authentication failure); the manager restores it before the next
/// operation of a batch. Field caches are consulted from inside `execute`
/// through [`RequestContext::read_field`] and [`RequestContext::write_field`].
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, operation: &Operation, ctx: &mut RequestContext) -> ExecutionResult;
}

/// A stage of the per-operation interception chain
///
/// Returning `None` passes the operation on to the next stage.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    async fn try_handle(
        &self,
        operation: &Operation,
        ctx: &mut RequestContext,
    ) -> Option<ExecutionResult>;
}
