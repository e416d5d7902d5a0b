use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use tracing::debug;

use aggregator_core::config::InvalidRowPolicy;
use aggregator_core::errors::{AggregatorError, AggregatorResult};
use aggregator_core::models::JobMetrics;

/// 输入文件中必须存在的两列，按表头名定位；其余列（如Date）一律忽略
pub const DEPARTMENT_COLUMN: &str = "Department Name";
pub const SALES_COLUMN: &str = "Number of Sales";

/// 输出文件表头
pub const OUTPUT_HEADERS: [&str; 2] = ["Department Name", "Total Number of Sales"];

/// 按部门累加销量的流式累加器，保持部门首次出现的顺序
#[derive(Debug, Default)]
pub struct SalesTotals {
    order: Vec<String>,
    totals: HashMap<String, i64>,
}

impl SalesTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, department: &str, sales: i64) {
        match self.totals.get_mut(department) {
            Some(total) => *total += sales,
            None => {
                self.order.push(department.to_string());
                self.totals.insert(department.to_string(), sales);
            }
        }
    }

    pub fn department_count(&self) -> usize {
        self.order.len()
    }

    /// 按首次出现顺序产出（部门，总销量）行
    pub fn rows(&self) -> impl Iterator<Item = (&str, i64)> {
        self.order
            .iter()
            .map(|dept| (dept.as_str(), self.totals[dept]))
    }
}

/// 把行式销售流归约为部门级总计并写出结果文件。
///
/// 行级容错（policy为Skip时）：部门名为空或销量不是整数的行被静默丢弃，
/// 既不计入总量也不增加部门数，更不会中断后续行的处理。输入无法打开、
/// 必需列缺失、输出无法写入则是流级致命错误，向上传播由调用方记为任务
/// 失败。耗时从打开输入流起算，到输出完全写出为止。
pub fn aggregate_file(
    input_path: &Path,
    output_path: &Path,
    policy: InvalidRowPolicy,
) -> AggregatorResult<JobMetrics> {
    let started = Instant::now();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input_path)
        .map_err(|e| {
            AggregatorError::Aggregation(format!(
                "cannot open input file {}: {e}",
                input_path.display()
            ))
        })?;

    let headers = reader
        .headers()
        .map_err(|e| AggregatorError::Aggregation(format!("cannot read header row: {e}")))?
        .clone();
    let department_idx = column_index(&headers, DEPARTMENT_COLUMN)?;
    let sales_idx = column_index(&headers, SALES_COLUMN)?;

    let mut totals = SalesTotals::new();
    let mut skipped: u64 = 0;

    for (row_number, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                if policy == InvalidRowPolicy::Fail {
                    return Err(AggregatorError::Aggregation(format!(
                        "malformed record at row {}: {e}",
                        row_number + 2
                    )));
                }
                skipped += 1;
                continue;
            }
        };

        let department = record.get(department_idx).unwrap_or("").trim();
        let sales = record
            .get(sales_idx)
            .unwrap_or("")
            .trim()
            .parse::<i64>()
            .ok();

        match (department.is_empty(), sales) {
            (false, Some(sales)) => totals.add(department, sales),
            _ => {
                if policy == InvalidRowPolicy::Fail {
                    return Err(AggregatorError::Aggregation(format!(
                        "invalid row {}: empty department or non-integer sales count",
                        row_number + 2
                    )));
                }
                skipped += 1;
            }
        }
    }

    write_output(output_path, &totals)?;

    if skipped > 0 {
        debug!(
            input_path = %input_path.display(),
            skipped, "dropped invalid rows during aggregation"
        );
    }

    Ok(JobMetrics {
        processing_time_ms: started.elapsed().as_millis() as i64,
        department_count: totals.department_count() as i64,
    })
}

fn column_index(headers: &csv::StringRecord, name: &str) -> AggregatorResult<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| {
            AggregatorError::Aggregation(format!("input is missing required column \"{name}\""))
        })
}

fn write_output(output_path: &Path, totals: &SalesTotals) -> AggregatorResult<()> {
    let mut writer = csv::Writer::from_path(output_path).map_err(|e| {
        AggregatorError::Aggregation(format!(
            "cannot create output file {}: {e}",
            output_path.display()
        ))
    })?;

    writer
        .write_record(OUTPUT_HEADERS)
        .map_err(|e| AggregatorError::Aggregation(format!("cannot write output header: {e}")))?;

    for (department, total) in totals.rows() {
        writer
            .write_record([department, &total.to_string()])
            .map_err(|e| AggregatorError::Aggregation(format!("cannot write output row: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| AggregatorError::Aggregation(format!("cannot flush output file: {e}")))?;
    Ok(())
}
