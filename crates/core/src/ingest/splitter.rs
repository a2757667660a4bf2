/// Split one feed line into trimmed fields.
///
/// A `"` toggles quoted mode and is never kept as data; a `,` separates fields only
/// outside quotes. Commas inside a quoted description therefore stay in that field.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(finish_field(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(finish_field(&mut current));
    fields
}

fn finish_field(current: &mut String) -> String {
    let field = std::mem::take(current);
    let trimmed = field.trim();
    let trimmed = trimmed.strip_prefix('"').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('"').unwrap_or(trimmed);
    trimmed.to_string()
}

/// Non-blank lines of a raw feed, with `\r\n` endings normalised.
pub fn feed_lines(raw: &str) -> Vec<&str> {
    raw.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_commas_stay_in_field() {
        let fields = split_line(r#"5,33490-B1030-G,"OIL COOLER ASSY PERODUA AXIA,BEZZA ORIGINAL",Fluids"#);
        assert_eq!(
            fields,
            vec![
                "5",
                "33490-B1030-G",
                "OIL COOLER ASSY PERODUA AXIA,BEZZA ORIGINAL",
                "Fluids"
            ]
        );
    }

    #[test]
    fn unquoted_commas_split() {
        let fields = split_line("5,33490-B1030-G,OIL COOLER ASSY PERODUA AXIA,BEZZA ORIGINAL");
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3], "BEZZA ORIGINAL");
    }

    #[test]
    fn fields_are_trimmed() {
        assert_eq!(split_line("  2 , (AC) 315143 ,  "), vec!["2", "(AC) 315143", ""]);
        assert_eq!(split_line(""), vec![""]);
    }

    #[test]
    fn feed_lines_drop_blanks_and_cr() {
        let raw = "Qty,Code\r\n\r\n1,A\r\n   \n2,B";
        assert_eq!(feed_lines(raw), vec!["Qty,Code", "1,A", "2,B"]);
    }
}
