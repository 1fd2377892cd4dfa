use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use termcolor::{Color, ColorSpec, WriteColor};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn bump(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live counters of a playback session, updated by every actor.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub packets_read: Counter,
    pub video_packets: Counter,
    pub audio_packets: Counter,
    pub frames_decoded: Counter,
    pub pictures_presented: Counter,
    pub decode_errors: Counter,
    pub flushes: Counter,
    pub seeks: Counter,
    pub seek_failures: Counter,
    pub audio_blocks: Counter,
    pub audio_underruns: Counter,
    pub audio_bytes_added: Counter,
    pub audio_bytes_dropped: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub frames_decoded: u64,
    pub pictures_presented: u64,
    pub decode_errors: u64,
    pub flushes: u64,
    pub seeks: u64,
    pub seek_failures: u64,
    pub audio_blocks: u64,
    pub audio_underruns: u64,
    pub audio_bytes_added: u64,
    pub audio_bytes_dropped: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.get(),
            video_packets: self.video_packets.get(),
            audio_packets: self.audio_packets.get(),
            frames_decoded: self.frames_decoded.get(),
            pictures_presented: self.pictures_presented.get(),
            decode_errors: self.decode_errors.get(),
            flushes: self.flushes.get(),
            seeks: self.seeks.get(),
            seek_failures: self.seek_failures.get(),
            audio_blocks: self.audio_blocks.get(),
            audio_underruns: self.audio_underruns.get(),
            audio_bytes_added: self.audio_bytes_added.get(),
            audio_bytes_dropped: self.audio_bytes_dropped.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsFormat {
    None,
    Table,
    Json,
}

impl FromStr for StatsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StatsFormat::None),
            "table" => Ok(StatsFormat::Table),
            "json" => Ok(StatsFormat::Json),
            _ => Err(format!("unknown stats format {s:?}, expected none, table or json")),
        }
    }
}

impl StatsSnapshot {
    fn rows(&self) -> [(&'static str, u64, bool); 13] {
        [
            ("packets read", self.packets_read, false),
            ("video packets", self.video_packets, false),
            ("audio packets", self.audio_packets, false),
            ("frames decoded", self.frames_decoded, false),
            ("pictures presented", self.pictures_presented, false),
            ("decode errors", self.decode_errors, true),
            ("flushes", self.flushes, false),
            ("seeks", self.seeks, false),
            ("seek failures", self.seek_failures, true),
            ("audio blocks", self.audio_blocks, false),
            ("audio underruns", self.audio_underruns, true),
            ("audio bytes added", self.audio_bytes_added, false),
            ("audio bytes dropped", self.audio_bytes_dropped, false),
        ]
    }

    pub fn write(&self, format: StatsFormat, out: &mut dyn WriteColor) -> io::Result<()> {
        match format {
            StatsFormat::None => Ok(()),
            StatsFormat::Json => {
                serde_json::to_writer_pretty(&mut *out, self)?;
                writeln!(out)
            }
            StatsFormat::Table => self.write_table(out),
        }
    }

    fn write_table(&self, out: &mut dyn WriteColor) -> io::Result<()> {
        for (label, value, is_problem) in self.rows() {
            out.set_color(ColorSpec::new().set_dimmed(true))?;
            write!(out, "{label:>20}  ")?;

            let mut spec = ColorSpec::new();
            if is_problem && value > 0 {
                spec.set_fg(Some(Color::Red)).set_bold(true);
            }
            out.set_color(&spec)?;
            writeln!(out, "{value}")?;
        }

        out.reset()
    }
}

#[cfg(test)]
mod tests {
    use termcolor::{Ansi, NoColor};

    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = SessionStats::default();
        stats.seeks.bump();
        stats.seeks.bump();
        stats.audio_bytes_added.add(128);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.seeks, 2);
        assert_eq!(snapshot.audio_bytes_added, 128);
        assert_eq!(snapshot.flushes, 0);
    }

    #[test]
    fn json_has_every_counter() {
        let stats = SessionStats::default();
        stats.pictures_presented.add(3);

        let mut out = NoColor::new(Vec::new());
        stats.snapshot().write(StatsFormat::Json, &mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out.into_inner()).unwrap();
        assert_eq!(value["pictures_presented"], 3);
        assert_eq!(value.as_object().unwrap().len(), 13);
    }

    #[test]
    fn table_highlights_problems() {
        let stats = SessionStats::default();
        stats.audio_underruns.bump();

        let mut out = Ansi::new(Vec::new());
        stats.snapshot().write(StatsFormat::Table, &mut out).unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();

        assert!(text.contains("audio underruns"));
        // bold red
        assert!(text.contains("\x1b[1m\x1b[31m1"));
    }

    #[test]
    fn parse_format() {
        assert_eq!("json".parse::<StatsFormat>(), Ok(StatsFormat::Json));
        assert!("yaml".parse::<StatsFormat>().is_err());
    }
}
