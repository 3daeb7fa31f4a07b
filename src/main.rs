use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use page_merge_sort::{ExternalSorterBuilder, SortReport};

const REPORT_HEADER: &str =
    "N,n,b,sorting_phases,read_operations,write_operations,merge_operations,drive_operations,expected_drive_operations";

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let page_records: usize = arg_parser.value_of_t_or_exit("page_records");
    let buffers: usize = arg_parser.value_of_t_or_exit("buffers");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let report_path: Option<&str> = arg_parser.value_of("report");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_page_records(page_records)
        .with_buffers(buffers);

    if let Some(page_bytes) = arg_parser.value_of("page_bytes") {
        let page_bytes = page_bytes.parse::<ByteSize>().expect("value is pre-validated").as_u64();
        sorter_builder = sorter_builder.with_page_bytes(usize::try_from(page_bytes).unwrap_or(usize::MAX));
    }

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let report = match sorter.sort(path::Path::new(input), path::Path::new(output)) {
        Ok(report) => report,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    log::info!("sorting phases: {}", report.stats.sorting_phases);
    log::info!("read operations: {}", report.stats.reads);
    log::info!("write operations: {}", report.stats.writes);
    log::info!("merge operations: {}", report.stats.merges);
    log::info!("drive operations: {}", report.drive_operations());
    log::info!("expected drive operations: {:.0}", report.expected_drive_operations);

    if let Some(report_path) = report_path {
        if let Err(err) = append_report(path::Path::new(report_path), &report) {
            log::error!("report saving error: {}", err);
            process::exit(1);
        }
    }
}

/// Appends the report as a CSV row, writing the header first if the file is new.
fn append_report(path: &path::Path, report: &SortReport) -> io::Result<()> {
    let is_new = !path.exists();
    let mut report_stream = io::BufWriter::new(fs::OpenOptions::new().create(true).append(true).open(path)?);

    if is_new {
        writeln!(report_stream, "{}", REPORT_HEADER)?;
    }
    writeln!(
        report_stream,
        "{},{},{},{},{},{},{},{},{:.0}",
        report.records,
        report.buffers,
        report.page_records,
        report.stats.sorting_phases,
        report.stats.reads,
        report.stats.writes,
        report.stats.merges,
        report.drive_operations(),
        report.expected_drive_operations,
    )?;

    report_stream.flush()
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("page-merge-sort")
        .about("balanced k-way external merge sort of numeric record files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("page_records")
                .short('b')
                .long("page-records")
                .help("number of records in a page buffer")
                .takes_value(true)
                .default_value("250"),
        )
        .arg(
            clap::Arg::new("buffers")
                .short('n')
                .long("buffers")
                .help("number of page buffers, runs are merged buffers - 1 at a time")
                .takes_value(true)
                .default_value("20"),
        )
        .arg(
            clap::Arg::new("page_bytes")
                .short('p')
                .long("page-bytes")
                .help("page capacity, unlimited by default")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Page size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for block sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("report")
                .short('r')
                .long("report")
                .help("CSV file the drive operation report is appended to")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
