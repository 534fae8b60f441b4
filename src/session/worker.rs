//! Detection worker thread.
//!
//! The session loop hands frames and template changes to a single worker thread
//! and polls for the outcome on later ticks. Jobs run strictly one after another,
//! so the detector never sees concurrent calls even if a stale job is still
//! running when a new one is queued, and the host thread never waits on it.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{Detection, Detector};
use crate::error::ModelLoadError;
use crate::frame::Frame;
use crate::template::Template;

pub(crate) type SharedDetector = Arc<Mutex<dyn Detector>>;

pub(crate) struct DetectionJob {
    pub seq: u64,
    pub frame: Arc<Frame>,
}

/// Hand a template to the detector.
pub(crate) struct TemplateJob {
    pub generation: u64,
    pub template: Template,
}

enum Job {
    Detect(DetectionJob),
    Template(TemplateJob),
}

pub(crate) struct DetectionOutcome {
    pub seq: u64,
    pub result: std::result::Result<Vec<Detection>, String>,
    pub elapsed: Duration,
}

pub(crate) struct TemplateOutcome {
    pub generation: u64,
    pub template: Template,
    pub result: std::result::Result<(), ModelLoadError>,
}

pub(crate) enum WorkerOutcome {
    Detection(DetectionOutcome),
    Template(TemplateOutcome),
}

pub(crate) struct DetectionWorker {
    jobs: Option<Sender<Job>>,
    results: Receiver<WorkerOutcome>,
    join: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn(detector: SharedDetector) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel();

        let join = std::thread::Builder::new()
            .name("visionseek-detect".to_string())
            .spawn(move || {
                for job in job_rx {
                    let outcome = match job {
                        Job::Detect(job) => WorkerOutcome::Detection(run_detect(&detector, job)),
                        Job::Template(job) => {
                            WorkerOutcome::Template(run_template(&detector, job))
                        }
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
                log::debug!("detection worker exiting");
            })
            .context("spawn detection worker")?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            join: Some(join),
        })
    }

    pub fn submit(&self, job: DetectionJob) -> Result<()> {
        self.send(Job::Detect(job))
    }

    /// Queue a template change behind any running detection.
    pub fn submit_template(&self, job: TemplateJob) -> Result<()> {
        self.send(Job::Template(job))
    }

    fn send(&self, job: Job) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("detection worker shut down"))?;
        jobs.send(job)
            .map_err(|_| anyhow!("detection worker stopped"))
    }

    /// Next finished job, if any. Errors once the worker thread is gone.
    pub fn try_result(&self) -> Result<Option<WorkerOutcome>> {
        match self.results.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("detection worker stopped")),
        }
    }

    /// Close the job queue and wait for the thread to finish its current job.
    pub fn shutdown(mut self) -> Result<()> {
        self.jobs.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detection worker thread panicked"))?;
        }
        Ok(())
    }
}

fn run_detect(detector: &SharedDetector, job: DetectionJob) -> DetectionOutcome {
    let started = Instant::now();
    let result = match detector.lock() {
        Ok(mut guard) => guard.detect(&job.frame).map_err(|e| format!("{e:#}")),
        Err(_) => Err("detector lock poisoned".to_string()),
    };
    DetectionOutcome {
        seq: job.seq,
        result,
        elapsed: started.elapsed(),
    }
}

fn run_template(detector: &SharedDetector, job: TemplateJob) -> TemplateOutcome {
    let result = match detector.lock() {
        Ok(mut guard) => super::push_template(&mut *guard, &job.template),
        Err(_) => Err(ModelLoadError::new("detector lock poisoned")),
    };
    TemplateOutcome {
        generation: job.generation,
        template: job.template,
        result,
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        // Closing the queue lets the thread exit; a hung detector is left detached.
        self.jobs.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::template::tests::PNG_MAGIC;

    struct EchoDetector;

    impl Detector for EchoDetector {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            if frame.width == 1 {
                return Err(anyhow!("too small"));
            }
            Ok(vec![Detection::new(
                format!("{}x{}", frame.width, frame.height),
                0.5,
                BoundingBox::new(0.5, 0.5, 1.0, 1.0),
            )])
        }

        fn set_template(&mut self, image: &[u8]) -> Result<i32> {
            Ok(if image.starts_with(b"\x89PNG") { 0 } else { 1 })
        }
    }

    fn wait(worker: &DetectionWorker) -> WorkerOutcome {
        for _ in 0..1000 {
            if let Some(outcome) = worker.try_result().unwrap() {
                return outcome;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("worker produced no result");
    }

    fn wait_detection(worker: &DetectionWorker) -> DetectionOutcome {
        match wait(worker) {
            WorkerOutcome::Detection(outcome) => outcome,
            WorkerOutcome::Template(_) => panic!("expected a detection outcome"),
        }
    }

    #[test]
    fn jobs_complete_in_order_with_errors_as_strings() {
        let worker = DetectionWorker::spawn(Arc::new(Mutex::new(EchoDetector))).unwrap();
        worker
            .submit(DetectionJob {
                seq: 1,
                frame: Arc::new(Frame::filled(4, 2, [0, 0, 0])),
            })
            .unwrap();
        worker
            .submit(DetectionJob {
                seq: 2,
                frame: Arc::new(Frame::filled(1, 1, [0, 0, 0])),
            })
            .unwrap();

        let first = wait_detection(&worker);
        assert_eq!(first.seq, 1);
        assert_eq!(first.result.unwrap()[0].label, "4x2");

        let second = wait_detection(&worker);
        assert_eq!(second.seq, 2);
        assert_eq!(second.result.unwrap_err(), "too small");

        worker.shutdown().unwrap();
    }

    #[test]
    fn template_jobs_run_in_queue_order() {
        let worker = DetectionWorker::spawn(Arc::new(Mutex::new(EchoDetector))).unwrap();
        worker
            .submit(DetectionJob {
                seq: 7,
                frame: Arc::new(Frame::filled(2, 2, [0, 0, 0])),
            })
            .unwrap();
        worker
            .submit_template(TemplateJob {
                generation: 1,
                template: Template::new("keys", "", "", PNG_MAGIC).unwrap(),
            })
            .unwrap();

        assert_eq!(wait_detection(&worker).seq, 7);
        match wait(&worker) {
            WorkerOutcome::Template(outcome) => {
                assert_eq!(outcome.generation, 1);
                assert_eq!(outcome.template.name, "keys");
                assert!(outcome.result.is_ok());
            }
            WorkerOutcome::Detection(_) => panic!("expected a template outcome"),
        }

        worker.shutdown().unwrap();
    }
}
