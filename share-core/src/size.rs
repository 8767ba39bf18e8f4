//! Human-readable byte sizes for catalog listings ("1.5KiB").

const UNITS: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

pub fn human_size(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in UNITS {
        if num.abs() < 1024.0 {
            return format!("{:3.1}{}B", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1}YiB", num)
}
