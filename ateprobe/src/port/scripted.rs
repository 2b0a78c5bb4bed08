//! Scripted transport used by the unit tests.
//!
//! Every write is handed to a responder whose output becomes readable
//! immediately. Reads with nothing pending sleep briefly and report
//! `TimedOut`, the way a real driver does when the line is quiet.

use {
    crate::{
        error::Result,
        port::{ControlLine, Port},
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    },
};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub(crate) struct ScriptedPort {
    pending: VecDeque<u8>,
    responder: Responder,
    echo: bool,
    idle_read: Duration,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    dtr: Arc<Mutex<Vec<bool>>>,
}

impl ScriptedPort {
    /// Reply to the n-th write with the n-th entry; silence afterwards.
    pub(crate) fn replies<I, B>(replies: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut queue: VecDeque<Vec<u8>> = replies
            .into_iter()
            .map(|r| r.as_ref().to_vec())
            .collect();
        Self::with_responder(move |_| queue.pop_front().unwrap_or_default())
    }

    /// Never answers anything.
    pub(crate) fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            pending: VecDeque::new(),
            responder: Box::new(responder),
            echo: false,
            idle_read: Duration::from_millis(2),
            writes: Arc::default(),
            dtr: Arc::default(),
        }
    }

    /// Bytes readable before anything is written.
    pub(crate) fn with_initial(mut self, bytes: &[u8]) -> Self {
        self.pending
            .extend(bytes);
        self
    }

    /// Reflect every write back ahead of the reply, like a half-duplex line.
    pub(crate) fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .clone()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .len()
    }

    pub(crate) fn dtr_log(&self) -> Arc<Mutex<Vec<bool>>> {
        Arc::clone(&self.dtr)
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            thread::sleep(self.idle_read);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf
            .iter_mut()
            .zip(self.pending.drain(..n))
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes
            .lock()
            .unwrap()
            .push(buf.to_vec());
        if self.echo {
            self.pending
                .extend(buf);
        }
        let reply = (self.responder)(buf);
        self.pending
            .extend(reply);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ScriptedControl {
    dtr: Arc<Mutex<Vec<bool>>>,
}

impl ControlLine for ScriptedControl {
    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr
            .lock()
            .unwrap()
            .push(level);
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.idle_read = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.idle_read
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.pending
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr
            .lock()
            .unwrap()
            .push(level);
        Ok(())
    }

    fn control_line(&self) -> Result<Box<dyn ControlLine>> {
        Ok(Box::new(ScriptedControl {
            dtr: Arc::clone(&self.dtr),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
