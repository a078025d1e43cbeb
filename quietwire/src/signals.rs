#[cfg(unix)]
pub(crate) use unix::Terminate;

#[cfg(windows)]
pub(crate) use windows::Terminate;

#[cfg(unix)]
mod unix {
    use std::future::poll_fn;
    use std::task::{Context, Poll};

    use anyhow::Result;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    pub(crate) struct Terminate {
        /// For Ctrl+C from a terminal
        sigint: Signal,
        /// For service managers stopping us
        sigterm: Signal,
    }

    impl Terminate {
        pub(crate) fn new() -> Result<Self> {
            let sigint = signal(SignalKind::interrupt())?;
            let sigterm = signal(SignalKind::terminate())?;

            Ok(Self { sigint, sigterm })
        }

        fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<()> {
            if self.sigint.poll_recv(cx).is_ready() || self.sigterm.poll_recv(cx).is_ready() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }

        /// Waits for SIGINT or SIGTERM.
        pub(crate) async fn recv(&mut self) {
            poll_fn(|cx| self.poll_recv(cx)).await
        }
    }
}

#[cfg(windows)]
mod windows {
    use anyhow::Result;

    pub(crate) struct Terminate;

    impl Terminate {
        pub(crate) fn new() -> Result<Self> {
            Ok(Self)
        }

        /// Waits for Ctrl+C.
        pub(crate) async fn recv(&mut self) {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
