//! Line-oriented frame feed: JSON frames in, JSON pose states out.
//!
//! Each input line is one of
//! - a keypoint array (or `null`),
//! - `{"keypoints": [...], "timestamp_ms": n}`,
//! - `{"op": "reset"}` / `{"op": "snapshot"}`.

use anyhow::Result;
use log::{Level, info, log_enabled, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};
use thiserror::Error;

use crate::classifier::{ManualClock, PoseClassifier, SessionSnapshot};
use crate::debug::{JsonDebugSink, LogDebugSink};
use crate::gestures::PoseState;
use crate::keypoint::Keypoint;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown op '{0}'")]
    UnknownOp(String),
    #[error("expected a keypoint array, a frame object or an op")]
    Shape,
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    #[serde(default)]
    keypoints: Option<Vec<Value>>,
    #[serde(default)]
    timestamp_ms: Option<u64>,
}

/// Entries that do not parse as a keypoint count as absent.
fn lenient_keypoints(entries: Vec<Value>) -> Vec<Option<Keypoint>> {
    entries
        .into_iter()
        .map(|v| serde_json::from_value(v).ok())
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum Line {
    Frame {
        keypoints: Vec<Option<Keypoint>>,
        timestamp_ms: Option<u64>,
    },
    Reset,
    Snapshot,
}

pub fn parse_line(line: &str) -> std::result::Result<Line, LineError> {
    let value: Value = serde_json::from_str(line)?;
    match value {
        Value::Null => Ok(Line::Frame {
            keypoints: Vec::new(),
            timestamp_ms: None,
        }),
        Value::Array(entries) => Ok(Line::Frame {
            keypoints: lenient_keypoints(entries),
            timestamp_ms: None,
        }),
        Value::Object(ref obj) if obj.contains_key("op") => {
            match obj.get("op").and_then(|v| v.as_str()) {
                Some("reset") => Ok(Line::Reset),
                Some("snapshot") => Ok(Line::Snapshot),
                Some(other) => Err(LineError::UnknownOp(other.to_string())),
                None => Err(LineError::Shape),
            }
        }
        Value::Object(_) => {
            let rec: FrameRecord = serde_json::from_value(value)?;
            Ok(Line::Frame {
                keypoints: lenient_keypoints(rec.keypoints.unwrap_or_default()),
                timestamp_ms: rec.timestamp_ms,
            })
        }
        _ => Err(LineError::Shape),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Attach the classifier's intermediate values to every frame result.
    pub debug: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub frames: u64,
    /// Frames that produced a gesture rather than a tracking failure.
    pub gesture_frames: u64,
    pub states: BTreeMap<PoseState, u64>,
    pub transitions: u64,
    pub resets: u64,
    pub errors: u64,
    pub snapshot: Option<SessionSnapshot>,
}

/// Feed every line of `input` through `classifier`, writing one JSON result
/// per line to `out`. Frames without a timestamp advance the clock by the
/// wall time elapsed since the last timestamped frame (or since the start).
/// Stops at EOF or once `stop` is raised.
pub fn run<R: BufRead, W: Write>(
    classifier: &mut PoseClassifier,
    clock: &ManualClock,
    input: R,
    mut out: W,
    opts: ReplayOptions,
    stop: &AtomicBool,
) -> Result<ReplaySummary> {
    let mut anchor: (u64, Instant) = (0, Instant::now());
    let mut summary = ReplaySummary::default();
    let mut sink = JsonDebugSink::new();
    let mut prev: Option<PoseState> = None;

    info!("replay: started");
    for (lineno, line) in input.lines().enumerate() {
        if stop.load(Ordering::Relaxed) {
            info!("replay: interrupted at line {}", lineno + 1);
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let resp = match parse_line(&line) {
            Ok(Line::Frame {
                keypoints,
                timestamp_ms,
            }) => {
                let now_ms = match timestamp_ms {
                    Some(ts) => {
                        anchor = (ts, Instant::now());
                        ts
                    }
                    None => anchor.0 + anchor.1.elapsed().as_millis() as u64,
                };
                clock.set(now_ms);

                let state = if opts.debug {
                    classifier.classify_with(&keypoints, &mut sink)
                } else if log_enabled!(Level::Trace) {
                    classifier.classify_with(&keypoints, &mut LogDebugSink)
                } else {
                    classifier.classify(&keypoints)
                };

                summary.frames += 1;
                if state.is_gesture() {
                    summary.gesture_frames += 1;
                }
                *summary.states.entry(state).or_default() += 1;
                if prev.is_some_and(|p| p != state) {
                    summary.transitions += 1;
                    info!(
                        "frame {}: {} -> {}",
                        summary.frames,
                        prev.map_or("-", |p| p.as_str()),
                        state
                    );
                }
                prev = Some(state);

                let mut resp = json!({"frame": summary.frames, "state": state});
                if opts.debug {
                    resp["debug"] = Value::Object(sink.take());
                }
                resp
            }
            Ok(Line::Reset) => {
                classifier.reset();
                summary.resets += 1;
                prev = None;
                info!("replay: session reset after frame {}", summary.frames);
                json!({"ok": true, "op": "reset"})
            }
            Ok(Line::Snapshot) => {
                json!({"ok": true, "op": "snapshot", "data": classifier.snapshot()})
            }
            Err(e) => {
                summary.errors += 1;
                warn!("line {}: {e}", lineno + 1);
                json!({"ok": false, "line": lineno + 1, "error": e.to_string()})
            }
        };

        writeln!(out, "{resp}")?;
        out.flush()?;
    }

    summary.snapshot = Some(classifier.snapshot());
    info!(
        "replay: {} frames, {} transitions, {} errors",
        summary.frames, summary.transitions, summary.errors
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Clock;
    use crate::config::Thresholds;

    const STANDING: &str = r#"[
        {"name":"nose","x":320,"y":100,"score":0.9},
        {"name":"left_shoulder","x":370,"y":150,"score":0.9},
        {"name":"right_shoulder","x":270,"y":150,"score":0.9},
        {"name":"left_hip","x":360,"y":270,"score":0.9},
        {"name":"right_hip","x":280,"y":270,"score":0.9},
        {"name":"left_wrist","x":375,"y":260,"score":0.9},
        {"name":"right_wrist","x":265,"y":260,"score":0.9},
        {"name":"left_elbow","x":380,"y":210,"score":0.9},
        {"name":"right_elbow","x":260,"y":210,"score":0.9}
    ]"#;

    fn one_line(json: &str) -> String {
        json.split_whitespace().collect::<Vec<_>>().join("")
    }

    fn replay(input: &str, opts: ReplayOptions) -> (ReplaySummary, Vec<Value>) {
        let clock = ManualClock::default();
        let mut c = PoseClassifier::with_clock(Thresholds::default(), clock.clone());
        let mut out = Vec::new();
        let stop = AtomicBool::new(false);
        let summary = run(&mut c, &clock, input.as_bytes(), &mut out, opts, &stop).unwrap();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, lines)
    }

    #[test]
    fn parses_line_shapes() {
        assert_eq!(
            parse_line("null").unwrap(),
            Line::Frame {
                keypoints: vec![],
                timestamp_ms: None
            }
        );
        assert_eq!(parse_line(r#"{"op":"reset"}"#).unwrap(), Line::Reset);
        assert_eq!(parse_line(r#"{"op":"snapshot"}"#).unwrap(), Line::Snapshot);
        assert!(matches!(
            parse_line(r#"{"op":"jump"}"#),
            Err(LineError::UnknownOp(op)) if op == "jump"
        ));
        assert!(matches!(parse_line("42"), Err(LineError::Shape)));
        assert!(matches!(parse_line("{not json"), Err(LineError::Json(_))));

        let framed =
            r#"{"keypoints":[null,{"name":"nose","x":1,"y":2,"score":0.5}],"timestamp_ms":40}"#;
        match parse_line(framed).unwrap() {
            Line::Frame {
                keypoints,
                timestamp_ms,
            } => {
                assert_eq!(keypoints.len(), 2);
                assert!(keypoints[0].is_none());
                assert_eq!(timestamp_ms, Some(40));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn replays_frames_and_counts_states() {
        let standing = one_line(STANDING);
        let input = format!("{standing}\n\n[]\n{standing}\n");
        let (summary, lines) = replay(&input, ReplayOptions::default());

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.gesture_frames, 2);
        assert_eq!(summary.transitions, 2);
        assert_eq!(summary.states[&PoseState::Idle], 2);
        assert_eq!(summary.states[&PoseState::PoseLost], 1);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["state"], "IDLE");
        assert_eq!(lines[1]["state"], "POSE_LOST");
        assert_eq!(lines[2]["frame"], 3);
        assert!(lines[0].get("debug").is_none());
    }

    #[test]
    fn timestamps_drive_the_incomplete_timer() {
        let input = [
            r#"{"keypoints":[{"name":"nose","x":1,"y":1,"score":0.9}],"timestamp_ms":1000}"#,
            r#"{"keypoints":[{"name":"nose","x":1,"y":1,"score":0.9}],"timestamp_ms":1200}"#,
            r#"{"keypoints":[{"name":"nose","x":1,"y":1,"score":0.9}],"timestamp_ms":1600}"#,
        ]
        .join("\n");
        let (_, lines) = replay(&input, ReplayOptions::default());
        assert_eq!(lines[0]["state"], "POSE_TEMPORARILY_INCOMPLETE");
        assert_eq!(lines[1]["state"], "POSE_TEMPORARILY_INCOMPLETE");
        assert_eq!(lines[2]["state"], "POSE_INCOMPLETE");
    }

    #[test]
    fn ops_and_errors_are_answered_inline() {
        let standing = one_line(STANDING);
        let snapshot = r#"{"op":"snapshot"}"#;
        let reset = r#"{"op":"reset"}"#;
        let input = format!("{standing}\n{snapshot}\n{reset}\nbogus\n{snapshot}\n");
        let (summary, lines) = replay(&input, ReplayOptions::default());

        assert_eq!(summary.resets, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(lines[1]["op"], "snapshot");
        assert_eq!(lines[1]["data"]["nose_samples"], 1);
        assert_eq!(lines[2]["op"], "reset");
        assert_eq!(lines[3]["ok"], false);
        assert_eq!(lines[3]["line"], 4);
        assert_eq!(lines[4]["data"]["nose_samples"], 0);
        assert_eq!(lines[4]["data"]["body_scale"], 1.0);
    }

    #[test]
    fn debug_values_are_attached_on_request() {
        let (_, lines) = replay(&one_line(STANDING), ReplayOptions { debug: true });
        assert_eq!(lines[0]["debug"]["torso_height"], 120.0);
        assert_eq!(lines[0]["debug"]["left_punch"], false);
    }

    #[test]
    fn stop_flag_ends_replay() {
        let clock = ManualClock::default();
        let mut c = PoseClassifier::with_clock(Thresholds::default(), clock.clone());
        let stop = AtomicBool::new(true);
        let mut out = Vec::new();
        let input = "null\nnull\n".as_bytes();
        let summary =
            run(&mut c, &clock, input, &mut out, ReplayOptions::default(), &stop).unwrap();
        assert_eq!(summary.frames, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_entries_are_treated_as_absent() {
        let standing = one_line(STANDING);
        let extras = [
            r#"{"name":"left_knee","x":null,"y":300,"score":0.9}"#,
            r#"{"name":7,"x":1,"y":2,"score":0.9}"#,
            r#""left_ankle""#,
        ];
        let frame = format!(
            "{},{}]",
            standing.trim_end_matches(']'),
            extras.join(",")
        );

        match parse_line(&frame).unwrap() {
            Line::Frame { keypoints, .. } => {
                assert_eq!(keypoints.len(), 12);
                assert!(keypoints[..9].iter().all(Option::is_some));
                assert!(keypoints[9..].iter().all(Option::is_none));
            }
            other => panic!("unexpected {other:?}"),
        }

        let (summary, lines) = replay(&frame, ReplayOptions::default());
        assert_eq!(summary.errors, 0);
        assert_eq!(lines[0]["state"], "IDLE");
    }

    #[test]
    fn broken_essential_joint_leaves_the_pose_incomplete() {
        let broken = one_line(STANDING).replace(
            r#"{"name":"nose","x":320,"y":100,"score":0.9}"#,
            r#"{"name":"nose","x":"320","y":100,"score":0.9}"#,
        );
        let input = format!(r#"{{"keypoints":{broken},"timestamp_ms":0}}"#);
        let (summary, lines) = replay(&input, ReplayOptions::default());
        assert_eq!(summary.errors, 0);
        assert_eq!(lines[0]["state"], "POSE_TEMPORARILY_INCOMPLETE");
    }

    #[test]
    fn untimestamped_frames_continue_from_the_last_timestamp() {
        let partial = r#"[{"name":"nose","x":1,"y":1,"score":0.9}]"#;
        let input = [
            format!(r#"{{"keypoints":{partial},"timestamp_ms":5000}}"#),
            partial.to_string(),
            format!(r#"{{"keypoints":{partial},"timestamp_ms":5600}}"#),
        ]
        .join("\n");

        let clock = ManualClock::default();
        let mut c = PoseClassifier::with_clock(Thresholds::default(), clock.clone());
        let mut out = Vec::new();
        let stop = AtomicBool::new(false);

        let first = input.lines().take(2).collect::<Vec<_>>().join("\n");
        run(&mut c, &clock, first.as_bytes(), &mut out, ReplayOptions::default(), &stop)
            .unwrap();
        assert!(clock.now_ms() >= 5000);

        let states: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["state"].clone())
            .collect();
        assert_eq!(states, ["POSE_TEMPORARILY_INCOMPLETE", "POSE_TEMPORARILY_INCOMPLETE"]);

        let (_, lines) = replay(&input, ReplayOptions::default());
        assert_eq!(lines[2]["state"], "POSE_INCOMPLETE");
    }
}
