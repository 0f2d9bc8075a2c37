//! Live view of the most recently annotated frame.
//!
//! `LiveView` is a single replace-latest slot: publishing never waits for
//! viewers, so a slow viewer can only miss frames. `LiveServer` serves the
//! slot to HTTP clients as an MJPEG (`multipart/x-mixed-replace`) stream.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const JPEG_QUALITY: u8 = 80;
const MAX_REQUEST_BYTES: usize = 8192;
const BOUNDARY: &str = "MJPEGBOUNDARY";
const VIEWER_POLL: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Slot {
    sequence: u64,
    jpeg: Option<Arc<Vec<u8>>>,
}

/// Latest-frame slot shared between the session and live viewers.
#[derive(Clone, Default)]
pub struct LiveView {
    inner: Arc<(Mutex<Slot>, Condvar)>,
}

impl LiveView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `frame` as JPEG and make it the current frame.
    pub fn publish(&self, frame: &RgbImage) -> Result<()> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(frame)
            .context("failed to encode live frame")?;
        self.replace(Some(Arc::new(jpeg)))
    }

    /// Offer the current frame to viewers again.
    pub fn republish(&self) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().map_err(|_| anyhow!("live view lock poisoned"))?;
        if slot.jpeg.is_some() {
            slot.sequence += 1;
            cvar.notify_all();
        }
        Ok(())
    }

    /// Current frame and its sequence number.
    pub fn latest(&self) -> Option<(u64, Arc<Vec<u8>>)> {
        let (lock, _) = &*self.inner;
        let slot = lock.lock().ok()?;
        slot.jpeg.clone().map(|jpeg| (slot.sequence, jpeg))
    }

    /// Wait up to `timeout` for a frame newer than `seen`.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<Vec<u8>>)> {
        let (lock, cvar) = &*self.inner;
        let slot = lock.lock().ok()?;
        let (slot, _) = cvar
            .wait_timeout_while(slot, timeout, |slot| {
                slot.jpeg.is_none() || slot.sequence <= seen
            })
            .ok()?;
        if slot.sequence <= seen {
            return None;
        }
        slot.jpeg.clone().map(|jpeg| (slot.sequence, jpeg))
    }

    fn replace(&self, jpeg: Option<Arc<Vec<u8>>>) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().map_err(|_| anyhow!("live view lock poisoned"))?;
        slot.sequence += 1;
        slot.jpeg = jpeg;
        cvar.notify_all();
        Ok(())
    }
}

/// Handle on a running live-view server.
#[derive(Debug)]
pub struct LiveServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl LiveServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("live view server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct LiveServer {
    addr: String,
    view: LiveView,
}

impl LiveServer {
    pub fn new(addr: impl Into<String>, view: LiveView) -> Self {
        Self {
            addr: addr.into(),
            view,
        }
    }

    pub fn spawn(self) -> Result<LiveServerHandle> {
        let configured: SocketAddr = self
            .addr
            .parse()
            .with_context(|| format!("invalid live view address {}", self.addr))?;
        let listener = TcpListener::bind(configured)
            .with_context(|| format!("failed to bind live view on {}", configured))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let view = self.view;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, view, shutdown_thread) {
                log::error!("live view stopped: {}", err);
            }
        });

        Ok(LiveServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, view: LiveView, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let view = view.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = serve_viewer(stream, &view, &shutdown) {
                        log::debug!("live viewer {} disconnected: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn serve_viewer(mut stream: TcpStream, view: &LiveView, shutdown: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let path = read_request_path(&mut stream)?;
    if path != "/" {
        stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")?;
        return Ok(());
    }

    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary={}\r\nCache-Control: no-cache\r\n\r\n",
        BOUNDARY
    )?;

    let mut seen = 0;
    if let Some((sequence, jpeg)) = view.latest() {
        write_part(&mut stream, &jpeg)?;
        seen = sequence;
    }
    while !shutdown.load(Ordering::SeqCst) {
        if let Some((sequence, jpeg)) = view.wait_newer(seen, VIEWER_POLL) {
            write_part(&mut stream, &jpeg)?;
            seen = sequence;
        }
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    write!(
        stream,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    )?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

fn read_request_path(stream: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
    }
    let request = String::from_utf8_lossy(&buf);
    let mut parts = request
        .lines()
        .next()
        .ok_or_else(|| anyhow!("empty request"))?
        .split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(path)) => Ok(path.to_string()),
        _ => Err(anyhow!("unsupported request")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_frame_and_bumps_sequence() {
        let view = LiveView::new();
        assert!(view.latest().is_none());

        view.publish(&RgbImage::new(4, 4)).unwrap();
        let (first, jpeg) = view.latest().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        view.republish().unwrap();
        let (second, _) = view.latest().unwrap();
        assert!(second > first);
    }

    #[test]
    fn republish_without_frame_is_noop() {
        let view = LiveView::new();
        view.republish().unwrap();
        assert!(view.latest().is_none());
        assert!(view.wait_newer(0, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_newer_wakes_on_publish() {
        let view = LiveView::new();
        let publisher = view.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(&RgbImage::new(2, 2)).unwrap();
        });
        let got = view.wait_newer(0, Duration::from_secs(5));
        handle.join().unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn server_streams_current_frame() {
        let view = LiveView::new();
        view.publish(&RgbImage::new(4, 4)).unwrap();
        let handle = LiveServer::new("127.0.0.1:0", view).spawn().unwrap();

        let mut stream = TcpStream::connect(handle.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 512];
        while !String::from_utf8_lossy(&received).contains("Content-Type: image/jpeg") {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0);
            received.extend_from_slice(&chunk[..n]);
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("multipart/x-mixed-replace"));

        drop(stream);
        handle.stop().unwrap();
    }
}
