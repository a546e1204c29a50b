use std::thread::{self, JoinHandle};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};
use crate::auth::Authorizer;
use crate::core::database::Database;
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{Action, Response};

struct Request {
    principal: String,
    action: Action,
    reply: Sender<Result<Response>>,
}

/// Pending reply of one submitted request.
pub struct Ticket {
    reply: Receiver<Result<Response>>,
}

impl Ticket {
    /// Block until the worker has run the request.
    pub fn wait(self) -> Result<Response> {
        self.reply.recv().map_err(|_| {
            Error::new(ErrorKind::Internal, "request worker stopped before replying".to_string())
        })?
    }
}

/// FIFO queue with a single worker that owns the engine. Requests run one
/// at a time, in submission order.
pub struct Serializer {
    queue: Option<Sender<Request>>,
    worker: Option<JoinHandle<Database>>,
}

impl Serializer {
    pub fn start(database: Database, authorizer: Box<dyn Authorizer>) -> Result<Self> {
        let (queue, requests) = unbounded();
        let worker = thread::Builder::new()
            .name("slotdb-serializer".to_string())
            .spawn(move || Self::run(database, authorizer, requests))?;

        Ok(Serializer {
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    fn run(mut database: Database, authorizer: Box<dyn Authorizer>, requests: Receiver<Request>) -> Database {
        while let Ok(request) = requests.recv() {
            let name = request.action.name();
            let result = Self::handle(&mut database, authorizer.as_ref(), &request.principal, request.action);
            match &result {
                Ok(_) => debug!(action = name, principal = %request.principal, "request done"),
                Err(e) => warn!(action = name, principal = %request.principal, error = %e, "request failed"),
            }
            // The caller may have dropped its ticket.
            let _ = request.reply.send(result);
        }
        database
    }

    fn handle(
        database: &mut Database,
        authorizer: &dyn Authorizer,
        principal: &str,
        action: Action,
    ) -> Result<Response> {
        let scope = action.scope();
        let permission = action.permission();
        if !authorizer.authorize(principal, permission, &scope) {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("{} lacks {:?} permission on {}", principal, permission, scope),
            ));
        }
        database.execute(action)
    }

    pub fn submit(&self, principal: &str, action: Action) -> Result<Ticket> {
        let (reply, ticket) = bounded(1);
        let request = Request {
            principal: principal.to_string(),
            action,
            reply,
        };
        let queue = self.queue.as_ref().ok_or_else(closed)?;
        queue.send(request).map_err(|_| closed())?;
        Ok(Ticket { reply: ticket })
    }

    pub fn execute(&self, principal: &str, action: Action) -> Result<Response> {
        self.submit(principal, action)?.wait()
    }

    /// Run every queued request, stop the worker and hand the engine back.
    pub fn shutdown(mut self) -> Result<Database> {
        self.queue.take();
        let worker = self.worker.take().ok_or_else(closed)?;
        worker
            .join()
            .map_err(|_| Error::new(ErrorKind::Internal, "request worker panicked".to_string()))
    }
}

impl Drop for Serializer {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn closed() -> Error {
    Error::new(ErrorKind::Internal, "request queue is closed".to_string())
}
