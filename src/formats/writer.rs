use crate::types::Variant;
use crate::{Error, Result};
use std::io::{BufWriter, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One JSON document per line.
    #[default]
    Json,
    Vcf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Vcf => "vcf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Ok(ExportFormat::Json),
            "vcf" => Ok(ExportFormat::Vcf),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A sample column of a VCF export.
#[derive(Debug, Clone)]
pub struct ExportSample {
    pub study_id: i64,
    pub sample_id: i64,
    pub name: String,
}

/// Streams variants into JSON lines or VCF text.
pub struct VariantWriter<W: Write> {
    out: BufWriter<W>,
    format: ExportFormat,
    samples: Vec<ExportSample>,
    written: u64,
}

impl<W: Write> VariantWriter<W> {
    pub fn new(out: W, format: ExportFormat, samples: Vec<ExportSample>) -> Result<Self> {
        let mut writer = Self {
            out: BufWriter::new(out),
            format,
            samples,
            written: 0,
        };
        if format == ExportFormat::Vcf {
            writer.write_vcf_header()?;
        }
        Ok(writer)
    }

    fn write_vcf_header(&mut self) -> Result<()> {
        writeln!(self.out, "##fileformat=VCFv4.3")?;
        writeln!(
            self.out,
            "##INFO=<ID=GENE,Number=.,Type=String,Description=\"Gene names\">"
        )?;
        writeln!(
            self.out,
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
        )?;
        write!(self.out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
        for sample in &self.samples {
            write!(self.out, "\t{}", sample.name)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    pub fn write(&mut self, variant: &Variant) -> Result<()> {
        match self.format {
            ExportFormat::Json => {
                serde_json::to_writer(&mut self.out, variant)?;
                writeln!(self.out)?;
            }
            ExportFormat::Vcf => self.write_vcf_record(variant)?,
        }
        self.written += 1;
        Ok(())
    }

    fn write_vcf_record(&mut self, v: &Variant) -> Result<()> {
        let ids = if v.ids.is_empty() {
            ".".to_string()
        } else {
            v.ids.join(";")
        };
        let info = match &v.annotation {
            Some(a) if !a.gene_names.is_empty() => format!("GENE={}", a.gene_names.join(",")),
            _ => ".".to_string(),
        };
        write!(
            self.out,
            "{}\t{}\t{}\t{}\t{}\t.\t.\t{}\tGT",
            v.chromosome, v.start, ids, v.reference, v.alternate, info
        )?;
        for sample in &self.samples {
            let genotype = v
                .study(sample.study_id)
                .and_then(|s| s.samples.get(&sample.sample_id))
                .map_or("./.", |d| d.genotype.as_str());
            write!(self.out, "\t{}", genotype)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        Ok(self.written)
    }
}
