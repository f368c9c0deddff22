use tabled::{settings::Style, Table, Tabled};
use crate::import::ImportReport;
use crate::key::RecordKind;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Per-kind counts of one import
#[derive(Tabled)]
pub struct KindRow {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Source")]
    pub source: usize,
    #[tabled(rename = "Embedded")]
    pub embedded: usize,
    #[tabled(rename = "Reused")]
    pub reused: usize,
    #[tabled(rename = "KV")]
    pub kv: usize,
    #[tabled(rename = "Vector")]
    pub vector: usize,
    #[tabled(rename = "Graph")]
    pub graph: String,
}

pub fn report_table(report: &ImportReport) -> String {
    let rows: Vec<KindRow> = RecordKind::all()
        .iter()
        .map(|&kind| KindRow {
            kind: kind.to_string(),
            source: report.source.get(kind),
            embedded: report.embedded.get(kind),
            reused: report.reused.get(kind),
            kv: report.written.kv.get(kind),
            vector: report.written.vector.get(kind),
            graph: match kind {
                RecordKind::Document => "-".to_string(),
                _ => report.written.graph.get(kind).to_string(),
            },
        })
        .collect();

    Table::new(&rows).with(Style::rounded()).to_string()
}
