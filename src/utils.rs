//! Helpers shared by the local and remote instances

use std::{
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    task::{Context, Poll},
};

use futures::ready;
use tokio::task::JoinHandle;

/// A spawned listener task
///
/// Awaiting it yields the listener's result. Dropping it aborts the listener, so when one
/// instance of a group exits the others are torn down with it.
pub struct ServerHandle(pub JoinHandle<io::Result<()>>);

impl ServerHandle {
    /// Spawn `fut` on the current runtime
    pub fn spawn<F>(fut: F) -> ServerHandle
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        ServerHandle(tokio::spawn(fut))
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Future for ServerHandle {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let joined = ready!(Pin::new(&mut self.0).poll(cx));
        Poll::Ready(joined.unwrap_or_else(|err| Err(io::Error::new(ErrorKind::Other, err))))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::future;

    use super::*;

    #[tokio::test]
    async fn test_server_handle_result() {
        let handle = ServerHandle::spawn(async { Err(io::Error::new(ErrorKind::Other, "exited")) });
        let err = handle.await.unwrap_err();
        assert_eq!(err.to_string(), "exited");
    }

    #[tokio::test]
    async fn test_server_handle_select_all() {
        let forever = ServerHandle::spawn(async {
            future::pending::<()>().await;
            Ok(())
        });
        let finished = ServerHandle::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });

        let (res, idx, _rest) = future::select_all(vec![forever, finished]).await;
        assert!(res.is_ok());
        assert_eq!(idx, 1);
    }
}
