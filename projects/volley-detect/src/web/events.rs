// Server-sent events: pushes every job state transition to the browser

use crate::dispatch::{Dispatcher, JobEvent};
use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const KEEP_ALIVE_SECS: u64 = 15;

/// Handler for GET /events
pub async fn events_handler(
    State(dispatcher): State<Dispatcher>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut updates = BroadcastStream::new(dispatcher.subscribe());
    let mut closed = dispatcher.closed();

    // The stream ends on dispatcher shutdown so graceful draining can finish.
    let stream = stream! {
        loop {
            let next = tokio::select! {
                biased;
                update = updates.next() => update,
                _ = closed.wait_for(|closed| *closed) => None,
            };
            let Some(update) = next else {
                break;
            };
            match update {
                Ok(event) => {
                    if let Some(sse_event) = to_sse_event(&event) {
                        yield Ok::<_, Infallible>(sse_event);
                    }
                }
                Err(e) => {
                    tracing::warn!("SSE subscriber fell behind: {}", e);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

fn to_sse_event(event: &JobEvent) -> Option<Event> {
    match Event::default().event(event.state.name()).json_data(event) {
        Ok(sse_event) => Some(sse_event.id(event.job_id.to_string())),
        Err(e) => {
            tracing::error!("Failed to encode job event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::execution::ScriptCommand;
    use crate::dispatch::types::JobState;
    use crate::dispatch::{DispatcherConfig, JobId};
    use crate::web::server::router;
    use axum::body::{Body, BodyDataStream};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Frame {
        event: String,
        id: Option<String>,
        data: Value,
    }

    fn dispatcher(dir: &TempDir, script: &str) -> Dispatcher {
        let script_path = dir.path().join("detections.sh");
        std::fs::write(&script_path, script).unwrap();
        Dispatcher::new(DispatcherConfig {
            command: ScriptCommand {
                program: PathBuf::from("sh"),
                script: script_path,
                working_dir: None,
            },
            max_jobs: None,
            history_limit: 8,
        })
    }

    async fn open_events(dispatcher: &Dispatcher) -> BodyDataStream {
        let response = router(dispatcher.clone())
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        response.into_body().into_data_stream()
    }

    /// Reads frames until one named `last` arrives, or the stream ends.
    async fn read_frames(body: &mut BodyDataStream, last: &str) -> Vec<Frame> {
        let mut buffer = String::new();
        let mut frames = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(chunk) = body.next().await {
                buffer.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
                while let Some(end) = buffer.find("\n\n") {
                    let block: String = buffer.drain(..end + 2).collect();
                    let fields: HashMap<&str, &str> = block
                        .lines()
                        .filter(|line| !line.starts_with(':'))
                        .filter_map(|line| line.split_once(": "))
                        .collect();
                    let Some(event) = fields.get("event") else {
                        continue;
                    };
                    frames.push(Frame {
                        event: event.to_string(),
                        id: fields.get("id").map(|id| id.to_string()),
                        data: serde_json::from_str(fields["data"]).unwrap(),
                    });
                    if *event == last {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap();
        frames
    }

    #[test]
    fn test_event_is_encoded() {
        let event = JobEvent::new(JobId(5), JobState::Completed);
        assert!(to_sse_event(&event).is_some());
    }

    #[tokio::test]
    async fn test_stream_carries_job_lifecycle() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"frames").unwrap();
        let dispatcher = dispatcher(&dir, "exit 4\n");
        let mut body = open_events(&dispatcher).await;

        let job_id = dispatcher
            .start_job("ball", "YOLOv8 (pretrained model)", &video, 0.5)
            .await
            .unwrap();
        let frames = read_frames(&mut body, "failed").await;

        let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(names, vec!["starting", "running", "failed"]);
        for frame in &frames {
            assert_eq!(frame.id.as_deref(), Some(job_id.to_string().as_str()));
            assert_eq!(frame.data["jobId"], job_id.0);
            assert_eq!(frame.data["state"], frame.event.as_str());
        }
        assert_eq!(frames[2].data["exitCode"], 4);
        assert!(frames[0].data.get("exitCode").is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"frames").unwrap();
        let dispatcher = dispatcher(&dir, "exec sleep 30\n");
        let mut body = open_events(&dispatcher).await;

        let job_id = dispatcher
            .start_job("players", "YOLOv9 (pretrained model)", &video, 0.5)
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let frames = read_frames(&mut body, "cancelled").await;
        let last = frames.last().unwrap();
        assert_eq!(last.event, "cancelled");
        assert_eq!(last.data["jobId"], job_id.0);

        // Nothing follows the shutdown, not even a keep-alive.
        let rest = tokio::time::timeout(Duration::from_secs(5), async {
            let mut rest = Vec::new();
            while let Some(chunk) = body.next().await {
                rest.extend_from_slice(&chunk.unwrap());
            }
            rest
        })
        .await
        .unwrap();
        assert!(rest.is_empty());
    }
}
