use crate::signal::{Sample, SampleSeries};
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::{fs::File, io, path::Path};

/// Parse a recording stored as `amplitude_mv<TAB>time_ms` lines without a
/// header. Blank lines and `#` comments are skipped.
pub fn read_ekg<T: Sample, R: io::Read>(reader: R) -> Result<SampleSeries<T>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(reader);

    let mut amplitude = Vec::new();
    let mut time_ms = Vec::new();
    for result in reader.records() {
        let record = result.context("reading record")?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.len() < 2 {
            anyhow::bail!("line {line}: expected amplitude and time columns");
        }
        let value: f64 = record[0]
            .parse()
            .with_context(|| format!("line {line}: amplitude is not a number: {}", &record[0]))?;
        let time: f64 = record[1]
            .parse()
            .with_context(|| format!("line {line}: time is not a number: {}", &record[1]))?;
        let value = num_traits::cast::<f64, T>(value)
            .ok_or_else(|| anyhow!("line {line}: amplitude {value} not representable"))?;
        amplitude.push(value);
        time_ms.push(time);
    }
    if amplitude.is_empty() {
        anyhow::bail!("no EKG samples found");
    }
    Ok(SampleSeries::from_millis(amplitude, time_ms)?)
}

pub fn parse_ekg_text<T: Sample>(text: &str) -> Result<SampleSeries<T>> {
    read_ekg(text.as_bytes())
}

/// Read a recording from disk.
pub fn read_ekg_file<T: Sample>(path: &Path) -> Result<SampleSeries<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_ekg(file).with_context(|| format!("failed to read {}", path.display()))
}

/// Write a recording in the same layout [`read_ekg`] accepts.
pub fn write_ekg<T: Sample, W: io::Write>(series: &SampleSeries<T>, writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    for (value, t) in series.amplitude().iter().zip(series.time_s()) {
        let value = value.to_f64().unwrap_or(f64::NAN);
        writer.write_record([format!("{value:.6}"), format!("{:.3}", t * 1000.0)])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_ekg_file<T: Sample>(series: &SampleSeries<T>, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_ekg(series, file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_recording() {
        let text = "# exported\n0.10\t1000\n0.25\t1002\n\n-0.05\t1004\n";
        let series: SampleSeries = parse_ekg_text(text).unwrap();
        assert_eq!(series.amplitude(), &[0.10, 0.25, -0.05]);
        assert_eq!(series.time_s(), &[0.0, 0.002, 0.004]);
    }

    #[test]
    fn reduced_precision_load() {
        let series: SampleSeries<f32> = parse_ekg_text("1.5\t0\n-2.25\t2\n").unwrap();
        assert_eq!(series.amplitude(), &[1.5f32, -2.25]);
    }

    #[test]
    fn reports_bad_lines() {
        let err = parse_ekg_text::<f64>("0.1\t0\nabc\t2\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");

        let err = parse_ekg_text::<f64>("0.1\n").unwrap_err();
        assert!(format!("{err:#}").contains("expected amplitude and time"));

        assert!(parse_ekg_text::<f64>("# nothing\n").is_err());
        assert!(parse_ekg_text::<f64>("0.1\t4\n0.2\t2\n").is_err());
    }

    #[test]
    fn write_then_read_keeps_samples() {
        let series = SampleSeries::from_uniform(vec![0.5, -0.25, 1.0], 500.0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ekg.txt");
        write_ekg_file(&series, &path).unwrap();
        let loaded: SampleSeries = read_ekg_file(&path).unwrap();
        assert_eq!(loaded.amplitude(), series.amplitude());
        assert_eq!(loaded.time_s(), series.time_s());
    }
}
