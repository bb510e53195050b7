use crate::dispatch::error::DispatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of a dispatched job, unique for the lifetime of its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Detection model offered by the form's second dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelSelection {
    CustomDataset,
    PretrainedV8,
    PretrainedV9,
}

impl ModelSelection {
    pub const ALL: [ModelSelection; 3] = [
        ModelSelection::CustomDataset,
        ModelSelection::PretrainedV8,
        ModelSelection::PretrainedV9,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ModelSelection::CustomDataset => "YOLOv8 (customed dataset)",
            ModelSelection::PretrainedV8 => "YOLOv8 (pretrained model)",
            ModelSelection::PretrainedV9 => "YOLOv9 (pretrained model)",
        }
    }

    /// Integer code understood by the detection script's `--model` flag.
    pub fn code(self) -> u8 {
        match self {
            ModelSelection::CustomDataset => 1,
            ModelSelection::PretrainedV8 => 2,
            ModelSelection::PretrainedV9 => 3,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.label() == label)
    }
}

impl FromStr for ModelSelection {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| DispatchError::InvalidModel(s.to_string()))
    }
}

/// Validated arguments for one run of the detection script.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub path: PathBuf,
    pub detection_target: String,
    pub model: ModelSelection,
    pub confidence: f64,
}

impl DetectionRequest {
    pub fn script_args(&self) -> Vec<String> {
        vec![
            "--detect".to_string(),
            self.detection_target.clone(),
            "--model".to_string(),
            self.model.code().to_string(),
            "--file".to_string(),
            self.path.to_string_lossy().into_owned(),
            "--confidence".to_string(),
            self.confidence.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum JobState {
    Starting,
    Running,
    Completed,
    Failed {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed { .. } | JobState::Cancelled
        )
    }

    /// Short name, used as the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Terminal state for a process that exited on its own.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => JobState::Completed,
            other => JobState::Failed { exit_code: other },
        }
    }
}

/// Point-in-time view of a job, served by the status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub detection_target: String,
    pub model: &'static str,
    pub model_code: u8,
    pub path: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub state: JobState,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn new(job_id: JobId, request: &DetectionRequest) -> Self {
        Self {
            job_id,
            detection_target: request.detection_target.clone(),
            model: request.model.label(),
            model_code: request.model.code(),
            path: request.path.to_string_lossy().into_owned(),
            confidence: request.confidence,
            state: JobState::Starting,
            pid: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn finish(mut self, state: JobState) -> Self {
        self.state = state;
        self.finished_at = Some(Utc::now());
        self
    }
}

/// State transition published to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub state: JobState,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, state: JobState) -> Self {
        Self {
            job_id,
            state,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_codes_follow_form_labels() {
        assert_eq!(
            ModelSelection::from_label("YOLOv8 (customed dataset)").map(|m| m.code()),
            Some(1)
        );
        assert_eq!(
            ModelSelection::from_label("YOLOv8 (pretrained model)").map(|m| m.code()),
            Some(2)
        );
        assert_eq!(
            ModelSelection::from_label("YOLOv9 (pretrained model)").map(|m| m.code()),
            Some(3)
        );
    }

    #[test]
    fn test_unknown_model_label_is_rejected() {
        for label in ["bogus", "", "yolov8 (pretrained model)", "2"] {
            let err = label.parse::<ModelSelection>().unwrap_err();
            assert!(matches!(err, DispatchError::InvalidModel(ref l) if l == label));
        }
    }

    #[test]
    fn test_script_args_order() {
        let request = DetectionRequest {
            path: PathBuf::from("/tmp/video.mp4"),
            detection_target: "ball".to_string(),
            model: ModelSelection::PretrainedV8,
            confidence: 0.5,
        };
        assert_eq!(
            request.script_args(),
            vec![
                "--detect",
                "ball",
                "--model",
                "2",
                "--file",
                "/tmp/video.mp4",
                "--confidence",
                "0.5"
            ]
        );
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(JobState::from_exit_code(Some(0)), JobState::Completed);
        assert_eq!(
            JobState::from_exit_code(Some(2)),
            JobState::Failed { exit_code: Some(2) }
        );
        assert_eq!(
            JobState::from_exit_code(None),
            JobState::Failed { exit_code: None }
        );
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_event_json_shape() {
        let event = JobEvent::new(JobId(3), JobState::Failed { exit_code: Some(1) });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["jobId"], 3);
        assert_eq!(value["state"], "failed");
        assert_eq!(value["exitCode"], 1);
    }
}
