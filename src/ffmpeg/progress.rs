//! Parser for the key=value stream ffmpeg writes with `-progress pipe:1`.

use std::sync::LazyLock;

use regex::Regex;

static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$").expect("valid key=value regex")
});

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):([0-5]?\d):([0-5]?\d(?:\.\d+)?)$").expect("valid clock regex")
});

static SPEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?(?:e[+-]?\d+)?)\s*x$").expect("valid speed regex")
});

static BITRATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*kbits/s$").expect("valid bitrate regex")
});

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub elapsed_seconds: f64,
    pub total_size: Option<u64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    /// `None` when the total duration is zero or unknown.
    pub percent: Option<f64>,
    pub finished: bool,
}

/// Running state for one job's progress stream.
#[derive(Clone, Debug, Default)]
pub struct ProgressAccumulator {
    pub total_duration: Option<f64>,
    pub snapshot: ProgressSnapshot,
}

impl ProgressAccumulator {
    pub fn new(total_duration: Option<f64>) -> Self {
        ProgressAccumulator {
            total_duration,
            snapshot: ProgressSnapshot::default(),
        }
    }
}

pub fn progress_percent(elapsed_seconds: f64, total_duration: Option<f64>) -> Option<f64> {
    match total_duration {
        Some(total) if total > 0.0 && total.is_finite() => Some(f64::min(100.0, 100.0 * elapsed_seconds.max(0.0) / total)),
        _ => None,
    }
}

/// Parses `H:MM:SS.ffffff` into seconds.
pub fn parse_clock(value: &str) -> Option<f64> {
    let caps = CLOCK.captures(value.trim())?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Feeds one line into the accumulator. Returns the updated snapshot when the
/// line carried a recognized key; anything else leaves the accumulator untouched.
pub fn parse_progress_line(line: &str, acc: &mut ProgressAccumulator) -> Option<ProgressSnapshot> {
    let caps = KEY_VALUE.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str();

    match key {
        "out_time" => set_elapsed(acc, parse_clock(value)?),
        "out_time_us" | "out_time_ms" => {
            // both keys carry microseconds
            let micros: i64 = value.parse().ok()?;
            if micros < 0 {
                return None;
            }
            set_elapsed(acc, micros as f64 / 1_000_000.0)
        },
        "total_size" => acc.snapshot.total_size = Some(value.parse().ok()?),
        "speed" => acc.snapshot.speed = Some(SPEED.captures(value)?[1].parse().ok()?),
        "bitrate" => acc.snapshot.bitrate_kbps = Some(BITRATE.captures(value)?[1].parse().ok()?),
        "frame" => acc.snapshot.frame = Some(value.parse().ok()?),
        "fps" => acc.snapshot.fps = Some(value.parse().ok()?),
        "progress" => match value {
            "end" => {
                acc.snapshot.finished = true;
                if acc.total_duration.is_some_and(|d| d > 0.0) {
                    acc.snapshot.percent = Some(100.0);
                }
            },
            "continue" => (),
            _ => return None,
        },
        _ => return None,
    }

    Some(acc.snapshot.clone())
}

fn set_elapsed(acc: &mut ProgressAccumulator, seconds: f64) {
    // out_time never moves backwards within one job
    if seconds >= acc.snapshot.elapsed_seconds {
        acc.snapshot.elapsed_seconds = seconds;
        acc.snapshot.percent = progress_percent(seconds, acc.total_duration);
    }
}

/// Collects raw pipe bytes and hands back only complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer { pending: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = vec![];
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw));
        }
        lines
    }

    /// Whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let raw = std::mem::take(&mut self.pending);
            Some(decode_line(&raw))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches(['\r', '\n']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(acc: &mut ProgressAccumulator, lines: &[&str]) -> Vec<ProgressSnapshot> {
        lines.iter().filter_map(|l| parse_progress_line(l, acc)).collect()
    }

    #[test]
    fn test_out_time() {
        let mut acc = ProgressAccumulator::new(None);
        let snapshot = parse_progress_line("out_time=00:01:23.45", &mut acc).unwrap();
        assert!((snapshot.elapsed_seconds - 83.45).abs() < 1e-9);
        assert_eq!(snapshot.percent, None);

        let snapshot = parse_progress_line("out_time=1:02:03.500000", &mut acc).unwrap();
        assert!((snapshot.elapsed_seconds - 3723.5).abs() < 1e-9);
    }

    #[test]
    fn test_out_time_microseconds() {
        let mut acc = ProgressAccumulator::new(Some(10.0));
        let snapshot = parse_progress_line("out_time_us=2500000", &mut acc).unwrap();
        assert!((snapshot.elapsed_seconds - 2.5).abs() < 1e-9);
        assert_eq!(snapshot.percent, Some(25.0));
        assert!(parse_progress_line("out_time_ms=-9223372036854775807", &mut acc).is_none());
    }

    #[test]
    fn test_speed_size_bitrate() {
        let mut acc = ProgressAccumulator::new(None);
        assert_eq!(parse_progress_line("speed=1.23x", &mut acc).unwrap().speed, Some(1.23));
        assert_eq!(parse_progress_line("speed= 4x", &mut acc).unwrap().speed, Some(4.0));
        assert_eq!(parse_progress_line("total_size=1048576", &mut acc).unwrap().total_size, Some(1048576));
        assert_eq!(parse_progress_line("bitrate=1234.5kbits/s", &mut acc).unwrap().bitrate_kbps, Some(1234.5));
        assert_eq!(parse_progress_line("frame=42", &mut acc).unwrap().frame, Some(42));
    }

    #[test]
    fn test_unrecognized_lines_leave_accumulator_unchanged() {
        let mut acc = ProgressAccumulator::new(Some(60.0));
        parse_progress_line("out_time=00:00:30.000000", &mut acc);
        let before = acc.snapshot.clone();
        for line in [
            "", "garbage", "out_time=N/A", "speed=N/A", "bitrate=N/A", "total_size=N/A",
            "stream_0_0_q=28.0", "out_time=00:0", "=", "progress=maybe", "dup_frames=0",
        ] {
            assert!(parse_progress_line(line, &mut acc).is_none(), "{:?}", line);
        }
        assert_eq!(acc.snapshot, before);
    }

    #[test]
    fn test_indeterminate_without_duration() {
        for total in [None, Some(0.0), Some(-5.0), Some(f64::NAN)] {
            let mut acc = ProgressAccumulator::new(total);
            let snapshot = parse_progress_line("out_time=00:00:05.000000", &mut acc).unwrap();
            assert_eq!(snapshot.percent, None);
            let end = parse_progress_line("progress=end", &mut acc).unwrap();
            assert!(end.finished);
            assert_eq!(end.percent, None);
        }
    }

    #[test]
    fn test_percent_is_capped() {
        assert_eq!(progress_percent(120.0, Some(100.0)), Some(100.0));
        assert_eq!(progress_percent(50.0, Some(100.0)), Some(50.0));
        assert_eq!(progress_percent(5.0, Some(0.0)), None);
    }

    #[test]
    fn test_known_sequence_is_monotonic_and_ends_at_100() {
        let mut acc = ProgressAccumulator::new(Some(10.0));
        let snapshots = feed(&mut acc, &[
            "frame=0", "out_time_us=0", "out_time=00:00:00.000000", "speed=N/A", "progress=continue",
            "frame=60", "out_time=00:00:02.500000", "total_size=262144", "speed=2.5x", "progress=continue",
            "frame=150", "out_time=00:00:06.000000", "progress=continue",
            "out_time=00:00:05.000000",
            "frame=238", "out_time=00:00:09.950000", "total_size=1048576", "progress=continue",
            "out_time=00:00:09.980000", "progress=end",
        ]);
        let percents: Vec<f64> = snapshots.iter().filter_map(|s| s.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert_eq!(percents.last(), Some(&100.0));
        assert!(snapshots.last().unwrap().finished);
    }

    #[test]
    fn test_line_buffer_holds_partial_lines() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"out_ti").is_empty());
        assert_eq!(buf.push(b"me=00:00:01.0\nspeed=1"), vec!["out_time=00:00:01.0"]);
        assert_eq!(buf.push(b".5x\r\nprogress=continue\n"), vec!["speed=1.5x", "progress=continue"]);
        assert_eq!(buf.finish(), None);
        buf.push(b"frame=1");
        assert_eq!(buf.finish().as_deref(), Some("frame=1"));
    }

    #[test]
    fn test_line_buffer_invalid_utf8() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\xff\xfe=oops\nframe=3\n");
        assert_eq!(lines.len(), 2);
        let mut acc = ProgressAccumulator::new(None);
        assert!(parse_progress_line(&lines[0], &mut acc).is_none());
        assert_eq!(parse_progress_line(&lines[1], &mut acc).unwrap().frame, Some(3));
    }
}
