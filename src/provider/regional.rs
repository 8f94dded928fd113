//! 組み込みの地域ルール
//!
//! US / EU / APAC / LATAM の 4 地域について、通貨・標準税率・必須フィールド・
//! 金額上下限・税番号形式・承認上限を保持します。

use serde::Serialize;

use super::traits::RegionalRuleSource;

/// 税番号の形式ルール
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxIdRule {
    /// 表示名（`tax ID`, `VAT number`, `GSTIN`）
    pub label: String,
    /// 正規表現
    pub pattern: String,
}

/// 承認上限
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApprovalLimits {
    pub auto_approve: f64,
    pub manager: f64,
    pub executive: f64,
}

/// 1 地域分のルール
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRules {
    pub region: String,
    pub currencies: Vec<String>,
    pub standard_tax_rate: f64,
    /// 地域で必須とされるフィールド名
    pub required_fields: Vec<String>,
    /// 表示用の日付形式（`MM/DD/YYYY` など）
    pub date_format: String,
    pub max_amount: Option<f64>,
    pub min_amount: f64,
    pub tax_id: Option<TaxIdRule>,
    /// `None` の場合は常に手動承認
    pub approval_limits: Option<ApprovalLimits>,
}

impl RegionRules {
    pub fn supports_currency(&self, currency: &str) -> bool {
        self.currencies.iter().any(|c| c.eq_ignore_ascii_case(currency))
    }
}

/// 組み込みルール表
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegionalRules;

impl BuiltinRegionalRules {
    pub fn new() -> Self {
        Self
    }

    /// 対応地域の一覧
    pub fn regions() -> [&'static str; 4] {
        ["US", "EU", "APAC", "LATAM"]
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn required_fields(extra_vendor: &[&str], extra_buyer: &[&str], tax_field: &str) -> Vec<String> {
    let mut fields = strings(&["invoice_number", "date", "vendor_name", "vendor_address"]);
    fields.extend(strings(extra_vendor));
    fields.extend(strings(&["buyer_name", "buyer_address"]));
    fields.extend(strings(extra_buyer));
    fields.extend(strings(&["line_items", "subtotal", tax_field, "total_amount"]));
    fields
}

impl RegionalRuleSource for BuiltinRegionalRules {
    fn rules_for(&self, region: &str) -> Option<RegionRules> {
        let rules = match region.trim().to_ascii_uppercase().as_str() {
            "US" => RegionRules {
                region: "US".to_string(),
                currencies: strings(&["USD"]),
                standard_tax_rate: 0.08,
                required_fields: required_fields(&[], &[], "tax_amount"),
                date_format: "MM/DD/YYYY".to_string(),
                max_amount: Some(50_000.0),
                min_amount: 0.01,
                tax_id: Some(TaxIdRule {
                    label: "tax ID".to_string(),
                    pattern: r"^\d{2}-\d{7}$".to_string(),
                }),
                approval_limits: Some(ApprovalLimits {
                    auto_approve: 1_000.0,
                    manager: 10_000.0,
                    executive: 50_000.0,
                }),
            },
            "EU" => RegionRules {
                region: "EU".to_string(),
                currencies: strings(&["EUR", "GBP", "CHF"]),
                standard_tax_rate: 0.20,
                required_fields: required_fields(
                    &["vendor_vat_number"],
                    &["buyer_vat_number"],
                    "vat_amount",
                ),
                date_format: "DD/MM/YYYY".to_string(),
                max_amount: Some(45_000.0),
                min_amount: 0.01,
                tax_id: Some(TaxIdRule {
                    label: "VAT number".to_string(),
                    pattern: r"^[A-Z]{2}\d{8,12}$".to_string(),
                }),
                approval_limits: Some(ApprovalLimits {
                    auto_approve: 900.0,
                    manager: 9_000.0,
                    executive: 45_000.0,
                }),
            },
            "APAC" => RegionRules {
                region: "APAC".to_string(),
                currencies: strings(&["INR", "SGD", "AUD", "JPY"]),
                standard_tax_rate: 0.18,
                required_fields: required_fields(&["vendor_gstin"], &["buyer_gstin"], "tax_amount"),
                date_format: "DD-MM-YYYY".to_string(),
                max_amount: Some(3_500_000.0),
                min_amount: 1.0,
                tax_id: Some(TaxIdRule {
                    label: "GSTIN".to_string(),
                    pattern: r"^\d{2}[A-Z]{5}\d{4}[A-Z]{1}[A-Z\d]{1}[Z]{1}[A-Z\d]{1}$".to_string(),
                }),
                approval_limits: Some(ApprovalLimits {
                    auto_approve: 75_000.0,
                    manager: 750_000.0,
                    executive: 3_500_000.0,
                }),
            },
            "LATAM" => RegionRules {
                region: "LATAM".to_string(),
                currencies: strings(&["BRL", "MXN", "COP", "CLP"]),
                standard_tax_rate: 0.16,
                required_fields: required_fields(&["vendor_tax_id"], &[], "tax_amount"),
                date_format: "DD/MM/YYYY".to_string(),
                max_amount: Some(250_000.0),
                min_amount: 0.01,
                tax_id: Some(TaxIdRule {
                    label: "tax ID".to_string(),
                    pattern: r"^\d{8,14}$".to_string(),
                }),
                approval_limits: Some(ApprovalLimits {
                    auto_approve: 5_000.0,
                    manager: 50_000.0,
                    executive: 250_000.0,
                }),
            },
            _ => return None,
        };
        Some(rules)
    }
}
