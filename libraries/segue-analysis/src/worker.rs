//! Background analysis worker
//!
//! One thread, one queue: requests are serialized by submission order and
//! results come back over a channel the engine polls from its tick. The
//! engine enforces its own 30 s deadline by request id; a late result for
//! an abandoned id is simply dropped on receipt.

use crate::analyzer::{analyze_blob, analyze_pcm, AnalyzeOptions};
use segue_core::TrackAnalysis;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

enum JobPayload {
    /// Already-decoded interleaved stereo PCM
    Pcm {
        samples: Arc<Vec<f32>>,
        sample_rate: u32,
    },
    /// Compressed bytes, decoded on the worker
    Blob(Vec<u8>),
}

struct Job {
    id: u64,
    song_id: String,
    payload: JobPayload,
    opts: AnalyzeOptions,
}

/// Completed analysis, successful or not
pub struct AnalysisOutcome {
    pub id: u64,
    pub song_id: String,
    pub result: std::result::Result<TrackAnalysis, String>,
}

/// Handle to the single analysis thread
pub struct AnalysisWorker {
    tx: Option<Sender<Job>>,
    rx: Receiver<AnalysisOutcome>,
    handle: Option<JoinHandle<()>>,
    next_id: u64,
}

impl AnalysisWorker {
    /// Spawn the worker thread
    pub fn new() -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (out_tx, out_rx) = mpsc::channel::<AnalysisOutcome>();

        let handle = std::thread::Builder::new()
            .name("segue-analysis".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let result = match job.payload {
                        JobPayload::Pcm {
                            samples,
                            sample_rate,
                        } => Ok(analyze_pcm(&samples, sample_rate, job.opts)),
                        JobPayload::Blob(bytes) => {
                            analyze_blob(&bytes, job.opts).map_err(|e| e.to_string())
                        }
                    };
                    let outcome = AnalysisOutcome {
                        id: job.id,
                        song_id: job.song_id,
                        result,
                    };
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .ok();

        Self {
            tx: Some(job_tx),
            rx: out_rx,
            handle,
            next_id: 0,
        }
    }

    /// Whether the worker thread actually started
    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    fn submit(&mut self, song_id: &str, payload: JobPayload, opts: AnalyzeOptions) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        if let Some(tx) = &self.tx {
            let _ = tx.send(Job {
                id,
                song_id: song_id.to_string(),
                payload,
                opts,
            });
        }
        id
    }

    /// Queue analysis of decoded PCM; returns the request id
    pub fn submit_pcm(
        &mut self,
        song_id: &str,
        samples: Arc<Vec<f32>>,
        sample_rate: u32,
        opts: AnalyzeOptions,
    ) -> u64 {
        self.submit(
            song_id,
            JobPayload::Pcm {
                samples,
                sample_rate,
            },
            opts,
        )
    }

    /// Queue decode + analysis of a byte blob; returns the request id
    pub fn submit_blob(&mut self, song_id: &str, bytes: Vec<u8>, opts: AnalyzeOptions) -> u64 {
        self.submit(song_id, JobPayload::Blob(bytes), opts)
    }

    /// Non-blocking poll for the next finished analysis
    pub fn poll(&mut self) -> Option<AnalysisOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl Default for AnalysisWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        // Closing the job channel lets the thread drain and exit
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(worker: &mut AnalysisWorker) -> AnalysisOutcome {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            if let Some(outcome) = worker.poll() {
                return outcome;
            }
            assert!(Instant::now() < deadline, "worker never answered");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn analyzes_pcm_in_background() {
        let mut worker = AnalysisWorker::new();
        assert!(worker.is_available());

        let samples: Arc<Vec<f32>> = Arc::new(
            (0..22050 * 20)
                .flat_map(|i| {
                    let s =
                        (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 22050.0).sin() * 0.4;
                    [s, s]
                })
                .collect(),
        );
        let id = worker.submit_pcm(
            "song-1",
            samples,
            22050,
            AnalyzeOptions { analyze_bpm: false },
        );

        let outcome = wait_for(&mut worker);
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.song_id, "song-1");
        let analysis = outcome.result.expect("analysis should succeed");
        assert!((analysis.duration - 20.0).abs() < 0.01);
    }

    #[test]
    fn bad_blob_reports_error_without_killing_worker() {
        let mut worker = AnalysisWorker::new();
        worker.submit_blob("bad", vec![1, 2, 3, 4], AnalyzeOptions::default());
        let outcome = wait_for(&mut worker);
        assert!(outcome.result.is_err());

        // Worker still serves subsequent requests
        let samples: Arc<Vec<f32>> = Arc::new(vec![0.1; 22050 * 2]);
        worker.submit_pcm("ok", samples, 22050, AnalyzeOptions { analyze_bpm: false });
        let outcome = wait_for(&mut worker);
        assert_eq!(outcome.song_id, "ok");
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn ids_are_monotonic() {
        let mut worker = AnalysisWorker::new();
        let a = worker.submit_blob("a", vec![0], AnalyzeOptions::default());
        let b = worker.submit_blob("b", vec![0], AnalyzeOptions::default());
        assert!(b > a);
    }
}
