//! Navigation requests from the session layer to the UI shell.

use tokio::sync::watch;
use tracing::debug;

/// Views the session layer can send the shell to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
}

/// Receives navigation requests.
///
/// Implementations must tolerate being asked for the same route repeatedly;
/// concurrent unauthorized responses each request the login view.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator backed by a watch channel.
///
/// Observers only see a change when the route actually changes, so a burst
/// of identical requests produces a single transition.
#[derive(Debug)]
pub struct RouteSignal {
    tx: watch::Sender<Route>,
}

impl RouteSignal {
    pub fn new(initial: Route) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribe to route changes.
    pub fn subscribe(&self) -> watch::Receiver<Route> {
        self.tx.subscribe()
    }

    /// The route the shell should currently show.
    pub fn current(&self) -> Route {
        *self.tx.borrow()
    }
}

impl Navigator for RouteSignal {
    fn navigate(&self, route: Route) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == route {
                false
            } else {
                *current = route;
                true
            }
        });

        if changed {
            debug!(?route, "navigated");
        }
    }
}
