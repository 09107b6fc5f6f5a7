//! 各サイトのパーサで共有する抽出ヘルパー

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};

use crate::error::{ConnectorError, Result};

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ConnectorError::Parse(format!("bad selector {:?}: {:?}", css, e)))
}

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 空白を正規化したテキスト
pub fn text(el: ElementRef<'_>) -> String {
    normalize_ws(&el.text().collect::<String>())
}

pub fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name)
}

/// 行の直下の `td` (文書順)
pub fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "td")
        .collect()
}

/// フォームの `input` の `name=value` 一覧。`types` が空なら全て
pub fn form_inputs(form: ElementRef<'_>, types: &[&str]) -> Result<Vec<(String, String)>> {
    let inputs = selector("input[name]")?;
    Ok(form
        .select(&inputs)
        .filter(|input| {
            types.is_empty() || types.contains(&input.value().attr("type").unwrap_or("text"))
        })
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// `1 234,56 €`、`-1.234,56`、`1,234.56`、`−12` などの金額を解析する。
/// 数字がなければ `None`
pub fn clean_amount(raw: &str) -> Option<f64> {
    let negative = raw.contains('-') || raw.contains('\u{2212}');
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let commas = kept.matches(',').count();
    let dots = kept.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) => kept,
        (_, 0) if commas == 1 => kept.replace(',', "."),
        (_, 0) => kept.replace(',', ""),
        (0, _) if dots == 1 => kept,
        (0, _) => kept.replace('.', ""),
        _ => {
            let last_comma = kept.rfind(',').unwrap_or(0);
            let last_dot = kept.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                kept.replace('.', "").replace(',', ".")
            } else {
                kept.replace(',', "")
            }
        }
    };

    let value: f64 = normalized.trim_matches('.').parse().ok()?;
    Some(if negative { -value } else { value })
}

/// 借方を優先し、借方は常に負
pub fn signed_amount(credit: &str, debit: &str) -> f64 {
    if let Some(debit) = clean_amount(debit) {
        -debit.abs()
    } else {
        clean_amount(credit).unwrap_or(0.0)
    }
}

/// `columns` の `positions` から最初に取れた金額 (列位置が変わる表向け)
pub fn first_amount(columns: &[String], positions: &[usize]) -> Option<f64> {
    positions
        .iter()
        .filter_map(|&i| columns.get(i))
        .find_map(|text| clean_amount(text))
}

/// 数値または整形済み文字列のJSONフィールドから金額を取る
pub fn json_amount(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => clean_amount(s),
        _ => None,
    }
}

/// JSONスカラーの文字列表現 (IDが数値で来ることがある)
pub fn json_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn currency_from_text(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    let code = if text.contains('€') || upper.contains("EUR") {
        "EUR"
    } else if text.contains('$') || upper.contains("USD") {
        "USD"
    } else if text.contains('£') || upper.contains("GBP") {
        "GBP"
    } else if upper.contains("CHF") {
        "CHF"
    } else {
        return None;
    };
    Some(code.to_string())
}

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d/%m/%y", "%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y", "%d%m%Y"];

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim().trim_matches('\u{a0}');
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// 候補はちょうど1件のはず。それ以外はサイト変更とみなす
pub fn exactly_one<T>(items: impl IntoIterator<Item = T>, what: &str) -> Result<T> {
    let mut items = items.into_iter();
    match (items.next(), items.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(ConnectorError::SiteAssertion(format!("no {} found", what))),
        (Some(_), Some(_)) => Err(ConnectorError::SiteAssertion(format!(
            "{} candidates for {}, expected exactly one",
            2 + items.count(),
            what
        ))),
    }
}
