pub mod batch_reader;
pub mod report_writer;
