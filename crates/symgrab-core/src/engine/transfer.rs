//! Chunked transfer loop shared by network streaming and local copies.
//!
//! Reads fixed-size chunks into the destination, updating the session
//! counters and emitting a progress event per chunk. Pausing blocks the
//! loop in a bounded poll between chunks; a pending cancellation stops it
//! before the next read.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::Instant;

use symgrab_types::EngineEvent;

use crate::engine::session::SessionShared;
use crate::error::SymgrabError;

/// Latency bound of the cooperative pause poll.
pub(crate) const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferSettings {
    pub(crate) chunk_size: usize,
    pub(crate) stopwatch_cycles: u32,
}

/// Copy `reader` into `writer` chunk by chunk, returning the bytes
/// written. Stops early on cancellation or when `expected` bytes (when
/// non-zero) have been transferred; otherwise runs to end of stream.
pub(crate) async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    expected: u64,
    name: &str,
    shared: &SessionShared,
    events: &broadcast::Sender<EngineEvent>,
    settings: TransferSettings,
) -> Result<u64, SymgrabError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use std::sync::atomic::Ordering;

    let mut buf = vec![0u8; settings.chunk_size];
    let mut written: u64 = 0;
    let mut readings: u32 = 0;
    let mut window = Instant::now();

    loop {
        if shared.is_cancel_requested() {
            break;
        }
        while shared.is_paused() {
            if shared.is_cancel_requested() {
                writer.flush().await?;
                return Ok(written);
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }

        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        written += n as u64;

        let file_progress = shared
            .current_file_progress
            .fetch_add(n as u64, Ordering::AcqRel)
            + n as u64;
        let total_progress = shared.total_progress.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
        let _ = events.send(EngineEvent::Progress {
            name: name.to_string(),
            total_progress,
            file_progress,
            file_size: shared.current_file_size.load(Ordering::Acquire),
            speed: shared.speed.load(Ordering::Acquire),
        });

        readings += 1;
        if readings >= settings.stopwatch_cycles {
            let elapsed = window.elapsed().as_millis() as u64;
            let speed = settings.chunk_size as u64 * u64::from(settings.stopwatch_cycles) * 1000
                / (elapsed + 1);
            shared.speed.store(speed, Ordering::Release);
            window = Instant::now();
            readings = 0;
        }

        if expected > 0 && file_progress >= expected {
            break;
        }
    }

    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const SETTINGS: TransferSettings = TransferSettings {
        chunk_size: 4096,
        stopwatch_cycles: 5,
    };

    fn harness() -> (Arc<SessionShared>, broadcast::Sender<EngineEvent>) {
        let (tx, _) = broadcast::channel(256);
        (Arc::new(SessionShared::default()), tx)
    }

    #[tokio::test]
    async fn copies_all_bytes_and_advances_counters() {
        let (shared, tx) = harness();
        let payload = vec![0xABu8; 10_000];
        let mut reader = Cursor::new(payload.clone());
        let mut writer = Cursor::new(Vec::new());

        let written = copy_chunked(
            &mut reader,
            &mut writer,
            payload.len() as u64,
            "a.pdb",
            &shared,
            &tx,
            SETTINGS,
        )
        .await
        .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(writer.into_inner(), payload);
        assert_eq!(
            shared.current_file_progress.load(Ordering::Acquire),
            10_000
        );
        assert_eq!(shared.total_progress.load(Ordering::Acquire), 10_000);
    }

    #[tokio::test]
    async fn unknown_size_runs_to_end_of_stream() {
        let (shared, tx) = harness();
        let mut reader = Cursor::new(vec![1u8; 5000]);
        let mut writer = Cursor::new(Vec::new());

        let written = copy_chunked(&mut reader, &mut writer, 0, "a.pdb", &shared, &tx, SETTINGS)
            .await
            .unwrap();

        assert_eq!(written, 5000);
    }

    #[tokio::test]
    async fn pending_cancellation_stops_before_reading() {
        let (shared, tx) = harness();
        shared.cancel_requested.store(true, Ordering::Release);
        let mut reader = Cursor::new(vec![1u8; 5000]);
        let mut writer = Cursor::new(Vec::new());

        let written = copy_chunked(
            &mut reader,
            &mut writer,
            5000,
            "a.pdb",
            &shared,
            &tx,
            SETTINGS,
        )
        .await
        .unwrap();

        assert_eq!(written, 0);
        assert!(writer.into_inner().is_empty());
    }

    #[tokio::test]
    async fn pause_halts_progress_until_resumed() {
        let (shared, tx) = harness();
        shared.paused.store(true, Ordering::Release);

        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let mut reader = Cursor::new(vec![7u8; 8192]);
            let mut writer = Cursor::new(Vec::new());
            copy_chunked(
                &mut reader,
                &mut writer,
                8192,
                "a.pdb",
                &task_shared,
                &tx,
                SETTINGS,
            )
            .await
        });

        // Progress stays at zero across repeated polls while paused.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert_eq!(shared.current_file_progress.load(Ordering::Acquire), 0);
        }

        shared.paused.store(false, Ordering::Release);
        let written = task.await.unwrap().unwrap();
        assert_eq!(written, 8192);
        assert_eq!(shared.current_file_progress.load(Ordering::Acquire), 8192);
    }

    #[tokio::test]
    async fn cancellation_during_pause_returns_partial_count() {
        let (shared, tx) = harness();
        shared.paused.store(true, Ordering::Release);

        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let mut reader = Cursor::new(vec![7u8; 4096]);
            let mut writer = Cursor::new(Vec::new());
            copy_chunked(
                &mut reader,
                &mut writer,
                4096,
                "a.pdb",
                &task_shared,
                &tx,
                SETTINGS,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shared.cancel_requested.store(true, Ordering::Release);
        let written = task.await.unwrap().unwrap();
        assert_eq!(written, 0);
    }
}
