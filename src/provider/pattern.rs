//! 正規表現による構造化抽出
//!
//! LLM が使えない、または失敗したときのフォールバック抽出器です。
//! 行単位のラベル（`Invoice #:`, `Bill To:`, `Total:` など）を手掛かりに
//! フィールドを拾います。見つからないフィールドは `None` のまま返し、
//! 値を推測で埋めることはしません。

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::ProviderError;
use super::traits::{
    parse_amount, ExtractedFields, ExtractedLineItem, ExtractionSchema, FieldExtractor,
};

const AMOUNT: &str = r"(?:USD|EUR|GBP|[$€£])?\s*([0-9][0-9,]*(?:\.\d{1,2})?)";

static INVOICE_NUMBER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\binvoice\s*(?:#|no\.?|number)\s*:?\s*([A-Z0-9][A-Z0-9\-_/]*)")
            .expect("regex for labelled invoice number"),
        Regex::new(r"\b([A-Z]{3}-\d{4}-\d{3})\b").expect("regex for INV-YYYY-NNN numbers"),
        Regex::new(r"(?i)\b(?:inv|reference|ref)\s*#\s*:?\s*([A-Z0-9][A-Z0-9\-_/]*)")
            .expect("regex for reference numbers"),
    ]
});

static VENDOR: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?im)^\s*(?:from|seller|vendor|supplier)\s*:\s*(.+?)\s*$")
            .expect("regex for labelled vendor"),
        Regex::new(r"\b([A-Z][A-Za-z&.,' ]+?\s(?:Inc|LLC|Ltd|Corp|Company)\.?)")
            .expect("regex for company suffixes"),
    ]
});

static BUYER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:bill\s+to|sold\s+to|to|buyer|customer|client)\s*:\s*(.+?)\s*$")
        .expect("regex for labelled buyer")
});

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:invoice\s+)?date\s*:\s*(.+?)\s*$").expect("regex for invoice date")
});

static DUE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:due\s+date|payment\s+due|due)\s*:\s*(.+?)\s*$")
        .expect("regex for due date")
});

static TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^\s*(?:grand\s+total|total(?:\s+amount)?(?:\s+due)?|amount\s+due|balance\s+due)\s*:?\s*{}",
        AMOUNT
    ))
    .expect("regex for total amount")
});

static SUBTOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^\s*sub\s*-?\s*total\s*:?\s*{}", AMOUNT)).expect("regex for subtotal")
});

static TAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)^\s*(?:total\s+)?(?:sales\s+tax|tax|vat|gst)(?:\s*\([^)]*\))?\s*:?\s*{}",
        AMOUNT
    ))
    .expect("regex for tax amount")
});

static DISCOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^\s*discount(?:\s*\([^)]*\))?\s*:?\s*-?\s*{}", AMOUNT))
        .expect("regex for discount")
});

static TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:tax\s*id|ein|vat(?:\s*(?:no\.?|number))?|gstin)\s*[:#]?\s*([A-Z0-9][A-Z0-9\-]+)\s*$")
        .expect("regex for tax id")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("regex for email")
});

static CURRENCY_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(USD|EUR|GBP|CHF|CAD|AUD|JPY|INR|SGD|BRL|MXN|COP|CLP)\b")
        .expect("regex for currency code")
});

static LINE_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*([A-Za-z][^\n]*?)[ \t]+(\d+(?:\.\d+)?)[ \t]*[x×@]?[ \t]+(?:USD|EUR|GBP|[$€£])?[ \t]*([0-9][0-9,]*\.\d{2})[ \t]+(?:USD|EUR|GBP|[$€£])?[ \t]*([0-9][0-9,]*\.\d{2})[ \t]*$",
    )
    .expect("regex for line items")
});

fn first_amount(regex: &Regex, text: &str) -> Option<f64> {
    first_capture(regex, text).and_then(|raw| parse_amount(&raw))
}

fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 通貨から地域を推定
pub fn region_for_currency(currency: &str) -> Option<&'static str> {
    match currency {
        "USD" => Some("US"),
        "EUR" | "GBP" | "CHF" => Some("EU"),
        "INR" | "SGD" | "AUD" | "JPY" => Some("APAC"),
        "BRL" | "MXN" | "COP" | "CLP" => Some("LATAM"),
        _ => None,
    }
}

/// 正規表現抽出器
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    /// テキストからフィールドを抽出
    pub fn extract(&self, text: &str) -> ExtractedFields {
        let invoice_number = INVOICE_NUMBER.iter().find_map(|re| first_capture(re, text));
        let vendor_name = VENDOR
            .iter()
            .find_map(|re| first_capture(re, text))
            .filter(|name| name.len() > 2);
        let buyer_name = first_capture(&BUYER, text).filter(|name| name.len() > 2);

        let currency = first_capture(&CURRENCY_CODE, text).or_else(|| {
            if text.contains('$') {
                Some("USD".to_string())
            } else if text.contains('€') {
                Some("EUR".to_string())
            } else if text.contains('£') {
                Some("GBP".to_string())
            } else {
                None
            }
        });
        let region = currency
            .as_deref()
            .and_then(region_for_currency)
            .map(str::to_string);

        let line_items = LINE_ITEM
            .captures_iter(text)
            .map(|caps| ExtractedLineItem {
                description: caps.get(1).map(|m| m.as_str().trim().to_string()),
                quantity: caps.get(2).and_then(|m| parse_amount(m.as_str())),
                unit_price: caps.get(3).and_then(|m| parse_amount(m.as_str())),
                total: caps.get(4).and_then(|m| parse_amount(m.as_str())),
            })
            .collect();

        let mut emails = EMAIL.find_iter(text).map(|m| m.as_str().to_string());

        ExtractedFields {
            invoice_number,
            date: first_capture(&DATE, text),
            due_date: first_capture(&DUE_DATE, text),
            vendor_name,
            vendor_tax_id: first_capture(&TAX_ID, text),
            vendor_email: emails.next(),
            buyer_name,
            buyer_email: emails.next(),
            line_items,
            currency,
            subtotal: first_amount(&SUBTOTAL, text),
            tax_amount: first_amount(&TAX, text),
            discount_amount: first_amount(&DISCOUNT, text),
            total_amount: first_amount(&TOTAL, text).filter(|v| *v > 0.0),
            region,
            ..Default::default()
        }
    }
}

#[async_trait]
impl FieldExtractor for PatternExtractor {
    async fn extract_fields(
        &self,
        text: &str,
        _schema: &ExtractionSchema,
    ) -> Result<ExtractedFields, ProviderError> {
        Ok(self.extract(text))
    }
}
