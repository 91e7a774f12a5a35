use crate::service::command::{Command, CommandChannel, Response};
use crate::service::context::ContextId;
use crate::service::error::Error;
use crate::service::executor::yield_now;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::rc::Rc;

/// Channel that delays every command result for a fixed number of executor turns.
///
/// A backend may report a command result before the events this command caused (for example,
/// a result of `exec-continue` before the `running` notification). Delaying results makes
/// listeners observe the event first, so caches are already invalidated when the result
/// arrives.
pub struct BufferedChannel {
    inner: Rc<dyn CommandChannel>,
    delay_turns: usize,
}

impl BufferedChannel {
    pub fn new(inner: Rc<dyn CommandChannel>, delay_turns: usize) -> Self {
        Self { inner, delay_turns }
    }
}

impl CommandChannel for BufferedChannel {
    fn issue(
        &self,
        context: ContextId,
        command: Command,
    ) -> LocalBoxFuture<'static, Result<Response, Error>> {
        let request = self.inner.issue(context, command);
        let delay = self.delay_turns;
        async move {
            let result = request.await;
            for _ in 0..delay {
                yield_now().await;
            }
            result
        }
        .boxed_local()
    }
}
