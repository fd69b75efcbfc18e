use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// One compact JSON document per line, for streaming results.
pub fn print_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Lay out `rows` under `headers`. Columns whose every cell is a whole number
/// are right-aligned.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }
    let numeric: Vec<bool> = (0..headers.len())
        .map(|i| {
            !rows.is_empty()
                && rows
                    .iter()
                    .all(|row| row.get(i).is_some_and(|cell| cell.parse::<u64>().is_ok()))
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                if numeric.get(i).copied().unwrap_or(false) {
                    format!("{:>width$}", cell, width = w)
                } else {
                    format!("{:width$}", cell, width = w)
                }
            })
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers.to_vec());
    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&sep.join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn numeric_columns_are_right_aligned() {
        let table = render_table(
            &["UOW", "EGRESS", "SOURCE"],
            &[row(&["uow-obs", "3", "ingest-a"]), row(&["u2", "12", "scenario"])],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "UOW      EGRESS  SOURCE");
        assert_eq!(lines[1], "-------  ------  --------");
        assert_eq!(lines[2], "uow-obs       3  ingest-a");
        assert_eq!(lines[3], "u2           12  scenario");
    }

    #[test]
    fn empty_table_prints_headers_only() {
        let table = render_table(&["UOW", "EGRESS"], &[]);
        assert_eq!(table, "UOW  EGRESS\n---  ------\n");
    }
}
