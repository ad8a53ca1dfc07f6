use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{BasaltError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A page-sized owned buffer shuttled between the caller and the worker.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request processed by the scheduler's worker thread.
pub struct DiskRequest {
    pub page_id: PageId,
    pub op: DiskOp,
}

pub enum DiskOp {
    /// Read the page; the worker sends back (success, filled buffer).
    Read(mpsc::Sender<(bool, PageBuf)>),
    /// Write the buffer; the worker sends back success.
    Write(PageBuf, mpsc::Sender<bool>),
}

/// DiskScheduler manages a background worker thread that processes disk I/O
/// requests. It provides asynchronous disk access through a request queue.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler with the given DiskManager.
    /// Spawns a background worker thread to process requests.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(dm_clone, receiver, shutdown_clone);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Schedules a disk request for processing by the background worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| BasaltError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (tx, rx) = mpsc::channel();
        self.schedule(DiskRequest {
            page_id,
            op: DiskOp::Read(tx),
        })?;

        let (ok, buf) = rx
            .recv()
            .map_err(|e| BasaltError::DiskScheduler(format!("Failed to receive completion: {}", e)))?;
        if !ok {
            return Err(BasaltError::DiskScheduler(format!(
                "Read of {} failed",
                page_id
            )));
        }
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (tx, rx) = mpsc::channel();
        self.schedule(DiskRequest {
            page_id,
            op: DiskOp::Write(buf, tx),
        })?;

        let ok = rx
            .recv()
            .map_err(|e| BasaltError::DiskScheduler(format!("Failed to receive completion: {}", e)))?;
        if !ok {
            return Err(BasaltError::DiskScheduler(format!(
                "Write of {} failed",
                page_id
            )));
        }
        Ok(())
    }

    /// The background worker thread function.
    /// Processes requests from the queue until shutdown is signaled.
    fn start_worker_thread(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(request) => {
                    Self::process_request(&disk_manager, request);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Continue loop, check shutdown flag
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
    }

    /// Processes a single disk request.
    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request.op {
            DiskOp::Read(done) => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let ok = disk_manager.read_page(request.page_id, &mut buf[..]).is_ok();
                let _ = done.send((ok, buf));
            }
            DiskOp::Write(buf, done) => {
                let ok = disk_manager.write_page(request.page_id, &buf[..]).is_ok();
                let _ = done.send(ok);
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
