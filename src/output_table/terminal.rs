//! Table printing either in human-readable format for terminals
//! (with spaces for padding, and ANSI sequences for formatting), or
//! as TSV.

//! Does not escape anything in the fields, just uses `Display` and
//! prints that directly. Thus is not safe if the type can print tabs
//! or newlines.

use std::{
    fmt::Display,
    io::{BufWriter, IsTerminal, Write},
};

use anyhow::{Result, anyhow, bail};
use strum_macros::EnumString;
use yansi::{Paint, Style};

#[derive(Debug, EnumString, PartialEq, Clone, Copy)]
#[strum(serialize_all = "kebab_case")]
pub enum ColorOpt {
    Auto,
    Always,
    Never,
}

impl ColorOpt {
    pub fn want_color(self, detected_terminal: bool) -> bool {
        match self {
            ColorOpt::Auto => detected_terminal,
            ColorOpt::Always => true,
            ColorOpt::Never => false,
        }
    }
}

#[derive(Debug, clap::Args, Clone)]
pub struct TerminalTableOpts {
    /// Show the table as TSV (with '\t' as separator) instead of
    /// human-readable
    #[clap(long)]
    pub tsv: bool,

    /// Whether to use ANSI codes to format human-readable output on
    /// terminals (auto, always, never)
    #[clap(long, default_value = "auto")]
    pub color: ColorOpt,
}

impl TerminalTableOpts {
    pub fn want_color(&self, detected_terminal: bool) -> bool {
        let Self { tsv, color } = self;
        if *tsv {
            false
        } else {
            color.want_color(detected_terminal)
        }
    }
}

/// Streams rows, which requires defining the column widths
/// beforehand. If a value is wider than its column, a single space is
/// still printed before the next value. The last column does not have
/// a width, and no padding is printed after it.
pub struct TerminalTable<O: Write> {
    pub opts: TerminalTableOpts,
    widths: Vec<usize>,
    padding: String,
    is_terminal: bool,
    out: BufWriter<O>,
}

const TITLE_STYLE: Style = Style::new().bold().italic();

impl<O: Write + IsTerminal> TerminalTable<O> {
    /// The length of `widths` must be one less than that of `titles`.
    /// `widths` include the spacing between the columns.
    pub fn start(
        widths: &[usize],
        titles: &[&str],
        opts: TerminalTableOpts,
        out: O,
    ) -> Result<Self> {
        let is_terminal = out.is_terminal();
        Self::start_with(widths, titles, opts, is_terminal, out)
    }
}

impl<O: Write> TerminalTable<O> {
    /// How many spaces to put between columns at minimum, even if a
    /// value is longer than anticipated.
    const MINIMAL_PADDING_LEN: usize = 1;

    /// Like `start` but for outputs that can't be asked whether they
    /// are a terminal.
    pub fn start_with(
        widths: &[usize],
        titles: &[&str],
        opts: TerminalTableOpts,
        is_terminal: bool,
        out: O,
    ) -> Result<Self> {
        let max_width = widths.iter().max().copied().unwrap_or(0);
        let mut slf = Self {
            opts,
            widths: widths.to_owned(),
            padding: " ".repeat(max_width.max(Self::MINIMAL_PADDING_LEN)),
            is_terminal,
            out: BufWriter::new(out),
        };
        let style = slf.opts.want_color(is_terminal).then_some(TITLE_STYLE);
        slf.write_row(titles, style)?;
        Ok(slf)
    }

    fn write_row<V: Display>(&mut self, row: &[V], line_style: Option<Style>) -> Result<()> {
        let lens = (self.widths.len(), row.len());
        if row.is_empty() {
            bail!("need at least 1 column")
        }
        if lens.0 != lens.1 - 1 {
            bail!("widths.len != data.len - 1: {lens:?}")
        }

        let widths = self.widths.iter().copied().map(Some).chain([None]);
        for (i, (val, width)) in row.iter().zip(widths).enumerate() {
            if self.opts.tsv && i > 0 {
                self.out.write_all(b"\t")?;
            }
            let mut text = val.to_string();
            let minimal_padding_len;
            if let Some(style) = line_style {
                // italic text is clipped on terminals without it
                text.push(' ');
                minimal_padding_len = Self::MINIMAL_PADDING_LEN.saturating_sub(1);
                write!(self.out, "{}", text.as_str().paint(style))?;
            } else {
                minimal_padding_len = Self::MINIMAL_PADDING_LEN;
                self.out.write_all(text.as_bytes())?;
            }
            if let Some(width) = width {
                if !self.opts.tsv {
                    let padding_len = width.saturating_sub(text.len()).max(minimal_padding_len);
                    self.out.write_all(self.padding[..padding_len].as_bytes())?;
                }
            }
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn write_data_row<V: Display>(&mut self, data: &[V], line_style: Option<Style>) -> Result<()> {
        let line_style = line_style.filter(|_| self.opts.want_color(self.is_terminal));
        self.write_row(data, line_style)
    }

    pub fn finish(self) -> Result<O> {
        self.out
            .into_inner()
            .map_err(|e| anyhow!("flushing the buffer: {}", e.error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(tsv: bool) -> TerminalTableOpts {
        TerminalTableOpts {
            tsv,
            color: ColorOpt::Auto,
        }
    }

    fn table(tsv: bool) -> String {
        let mut t =
            TerminalTable::start_with(&[6, 4], &["call", "a", "b"], opts(tsv), false, Vec::new())
                .unwrap();
        t.write_data_row(&["0", "1.5", "2 KB/s"], None).unwrap();
        t.write_data_row(&["12345678", "x", "y"], None).unwrap();
        String::from_utf8(t.finish().unwrap()).unwrap()
    }

    #[test]
    fn t_human_readable() {
        assert_eq!(
            table(false),
            "call  a   b\n0     1.5 2 KB/s\n12345678 x   y\n"
        );
    }

    #[test]
    fn t_tsv() {
        assert_eq!(table(true), "call\ta\tb\n0\t1.5\t2 KB/s\n12345678\tx\ty\n");
    }

    #[test]
    fn t_row_length_checked() {
        let mut t =
            TerminalTable::start_with(&[6], &["a", "b"], opts(false), false, Vec::new()).unwrap();
        assert!(t.write_data_row(&["1", "2", "3"], None).is_err());
        assert!(t.write_data_row::<&str>(&[], None).is_err());
    }

    #[test]
    fn t_color_opt() {
        assert!(opts(false).want_color(true));
        assert!(!opts(false).want_color(false));
        assert!(!opts(true).want_color(true));
        assert!(ColorOpt::Always.want_color(false));
    }
}
