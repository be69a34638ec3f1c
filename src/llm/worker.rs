use std::{thread::JoinHandle, time::Duration};

use crossbeam::channel::{Receiver, Sender};

use super::{GenerateError, GeneratedLine, TextGenerator};

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub ticket: u64,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub ticket: u64,
    pub result: Result<GeneratedLine, GenerateError>,
}

/// Owns the text generator on a background thread so the render loop never
/// waits on the network.
struct GeneratorLoop {
    generator: Box<dyn TextGenerator>,
    timeout: Duration,
    rx: Receiver<GenerateRequest>,
    tx: Sender<GenerateReply>,
}

impl GeneratorLoop {
    /// Block for the next request, then skip ahead to the newest one queued.
    /// Older requests were superseded before they reached the network.
    fn wait_input(&self) -> Option<GenerateRequest> {
        let mut request = self.rx.recv().ok()?;
        while let Ok(newer) = self.rx.try_recv() {
            log::debug!("request {} superseded by {}", request.ticket, newer.ticket);
            request = newer;
        }
        Some(request)
    }

    fn run_loop(&mut self) {
        while let Some(request) = self.wait_input() {
            log::debug!(
                "{}: generating ticket {} ({} prompt bytes)",
                self.generator.name(),
                request.ticket,
                request.prompt.len()
            );
            let result = self.generator.generate(&request.prompt, self.timeout);
            match &result {
                Ok(line) => log::debug!("ticket {}: {:?}", request.ticket, line.text()),
                Err(err) => log::warn!("ticket {} failed: {err}", request.ticket),
            }

            let reply = GenerateReply {
                ticket: request.ticket,
                result,
            };
            if self.tx.send(reply).is_err() {
                break;
            }
        }
        log::info!("{} worker stopped", self.generator.name());
    }
}

pub struct LlmWorker {
    tx: Option<Sender<GenerateRequest>>,
    rx: Receiver<GenerateReply>,
    handle: Option<JoinHandle<()>>,
}

impl LlmWorker {
    pub fn spawn(generator: Box<dyn TextGenerator>, timeout: Duration) -> Self {
        let (request_tx, request_rx) = crossbeam::channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam::channel::unbounded();

        log::info!("starting {} worker (timeout {timeout:?})", generator.name());
        let mut generator_loop = GeneratorLoop {
            generator,
            timeout,
            rx: request_rx,
            tx: reply_tx,
        };
        let handle = std::thread::spawn(move || generator_loop.run_loop());

        Self {
            tx: Some(request_tx),
            rx: reply_rx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, request: GenerateRequest) -> bool {
        match &self.tx {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    pub fn try_recv(&self) -> Option<GenerateReply> {
        self.rx.try_recv().ok()
    }

    /// Close the request channel and detach the thread. A call in flight
    /// finishes on its own, bounded by the request timeout, and its reply is
    /// dropped.
    pub fn close(&mut self) {
        self.tx.take();
        self.handle.take();
    }
}

impl Drop for LlmWorker {
    fn drop(&mut self) {
        self.close();
    }
}
