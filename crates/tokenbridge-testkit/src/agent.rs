//! Scripted in-memory agents
//!
//! A [`ScriptedAgent`] serves one role on a [`MemoryConnector`]. Every frame
//! the client sends is logged and handed to a responder closure, whose
//! [`Reply`] list is played back in order. Connections are served one after
//! another, matching the one-session-per-role rule.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_core::{AgentRole, OutboundFrame};
use tokenbridge_transport::MemoryConnector;
use tokio::task::JoinHandle;

/// One scripted action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Binary(Vec<u8>),
    /// Pause before the next reply
    Delay(Duration),
    /// Close the agent side of the socket
    Hangup,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// `bytes` split into `chunk_size` binary frames
    pub fn chunks(bytes: &[u8], chunk_size: usize) -> Vec<Self> {
        bytes
            .chunks(chunk_size.max(1))
            .map(|chunk| Self::Binary(chunk.to_vec()))
            .collect()
    }
}

/// A frame the agent received, tagged with the connection it arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub connection: usize,
    pub frame: OutboundFrame,
}

impl ReceivedFrame {
    pub fn text(&self) -> Option<&str> {
        match &self.frame {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Binary(_) => None,
        }
    }
}

/// Agent task serving one role
#[derive(Debug)]
pub struct ScriptedAgent {
    role: AgentRole,
    log: Arc<Mutex<Vec<ReceivedFrame>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl ScriptedAgent {
    /// Serve `role` on `connector`. `responder` gets the zero-based
    /// connection number and each received frame.
    pub fn spawn<F>(connector: &MemoryConnector, role: AgentRole, mut responder: F) -> Self
    where
        F: FnMut(usize, &OutboundFrame) -> Vec<Reply> + Send + 'static,
    {
        let mut incoming = connector.listen(role);
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0usize));

        let task_log = Arc::clone(&log);
        let task_connections = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Some(mut handle) = incoming.recv().await {
                let connection = {
                    let mut count = task_connections.lock();
                    *count += 1;
                    *count - 1
                };

                while let Some(frame) = handle.recv().await {
                    task_log.lock().push(ReceivedFrame {
                        connection,
                        frame: frame.clone(),
                    });
                    for reply in responder(connection, &frame) {
                        match reply {
                            Reply::Text(text) => {
                                handle.send_text(text);
                            }
                            Reply::Binary(bytes) => {
                                handle.send_binary(bytes);
                            }
                            Reply::Delay(duration) => tokio::time::sleep(duration).await,
                            Reply::Hangup => handle.close(),
                        }
                    }
                }
            }
        });

        Self {
            role,
            log,
            connections,
            task,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Everything received so far
    pub fn received(&self) -> Vec<ReceivedFrame> {
        self.log.lock().clone()
    }

    /// Text commands received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|received| received.text().map(str::to_string))
            .collect()
    }

    /// Text commands starting with `prefix`
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    /// Binary uploads received so far
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .iter()
            .filter_map(|received| match &received.frame {
                OutboundFrame::Binary(bytes) => Some(bytes.clone()),
                OutboundFrame::Text(_) => None,
            })
            .collect()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        *self.connections.lock()
    }
}

impl Drop for ScriptedAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Text of a frame, if it is a command
pub fn command_text(frame: &OutboundFrame) -> Option<&str> {
    match frame {
        OutboundFrame::Text(text) => Some(text),
        OutboundFrame::Binary(_) => None,
    }
}
