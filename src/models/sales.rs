// src/models/sales.rs

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::inventory::StockShortfall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "sale_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct CommercialSale {
    pub id: i64,
    pub order_id: i64,
    pub order_client_id: i64,
    pub commercial_id: i64,
    pub supervisor_id: i64,
    pub region_id: Option<i64>,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub sale_date: NaiveDate,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub payment_status: String,
    pub payment_due_date: Option<NaiveDate>,
    pub status: SaleStatus,
    pub notes: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct OrderToConfirm {
    pub id: i64,
    pub reference: String,
    pub order_date: NaiveDate,
    pub commercial_id: i64,
    pub commercial_name: String,
    pub region_id: Option<i64>,
    pub client_count: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConfirmSalePayload {
    #[validate(length(min = 1, code = "required"))]
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub sale_date: NaiveDate,
    #[validate(length(min = 1, code = "required"))]
    pub payment_method: String,
    #[validate(length(min = 1, code = "required"))]
    pub payment_status: String,
    pub payment_due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Cabeçalho de venda já calculado para um cliente do pedido.
#[derive(Debug, Clone)]
pub struct NewSale {
    pub order_id: i64,
    pub order_client_id: i64,
    pub commercial_id: i64,
    pub supervisor_id: i64,
    pub region_id: Option<i64>,
    pub invoice_number: String,
    pub total_amount: Decimal,
}

/// Uma fatura por cliente; com vários clientes o número ganha o sufixo `-<client_id>`.
pub fn invoice_number_for(base: &str, order_client_id: i64, order_has_many_clients: bool) -> String {
    if order_has_many_clients {
        format!("{base}-{order_client_id}")
    } else {
        base.to_string()
    }
}

/// Compara o exigido com o disponível. Vazio significa que a confirmação pode seguir.
pub fn compute_shortfalls(
    required: &BTreeMap<i64, Decimal>,
    available: &HashMap<i64, Decimal>,
    names: &HashMap<i64, String>,
) -> Vec<StockShortfall> {
    required
        .iter()
        .filter_map(|(item_id, needed)| {
            let have = available.get(item_id).copied().unwrap_or(Decimal::ZERO);
            (have < *needed).then(|| {
                StockShortfall::new(
                    *item_id,
                    names.get(item_id).cloned().unwrap_or_else(|| format!("#{item_id}")),
                    *needed,
                    have,
                )
            })
        })
        .collect()
}

// ---
// Objetivos
// ---
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct SalesObjective {
    pub id: i64,
    pub commercial_id: i64,
    pub supervisor_id: Option<i64>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub target_quantity: Decimal,
    pub target_value: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ObjectiveItemPayload {
    pub stock_item_id: i64,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub target_quantity: Decimal,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub target_value: Decimal,
    #[validate(custom(function = "crate::models::validate_not_negative"))]
    pub selling_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateObjectivePayload {
    pub commercial_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub notes: Option<String>,
    #[validate(nested)]
    pub items: Vec<ObjectiveItemPayload>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProgressQuery {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub commercial_id: Option<i64>,
}

/// Soma por item vinda do banco (metas ou vendas).
#[derive(Debug, Clone, FromRow)]
pub struct ItemAmount {
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub quantity: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ItemProgress {
    pub stock_item_id: i64,
    pub stock_item_name: String,
    pub target_quantity: Decimal,
    pub target_value: Decimal,
    pub sold_quantity: Decimal,
    pub sold_value: Decimal,
    pub progress_quantity: Decimal,
    pub progress_value: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProgressReport {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub items: Vec<ItemProgress>,
    pub total_target_quantity: Decimal,
    pub total_target_value: Decimal,
    pub total_sold_quantity: Decimal,
    pub total_sold_value: Decimal,
    pub progress_quantity: Decimal,
    pub progress_value: Decimal,
}

/// `100 · sold / target`; meta zero com venda conta como 100%.
pub fn progress_pct(sold: Decimal, target: Decimal) -> Decimal {
    if target.is_zero() {
        if sold > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    } else {
        (Decimal::ONE_HUNDRED * sold / target).round_dp(2)
    }
}

impl ProgressReport {
    pub fn build(
        date_from: NaiveDate,
        date_to: NaiveDate,
        targets: Vec<ItemAmount>,
        sold: Vec<ItemAmount>,
    ) -> Self {
        let mut rows: BTreeMap<i64, ItemProgress> = BTreeMap::new();
        let blank = |a: &ItemAmount| ItemProgress {
            stock_item_id: a.stock_item_id,
            stock_item_name: a.stock_item_name.clone(),
            target_quantity: Decimal::ZERO,
            target_value: Decimal::ZERO,
            sold_quantity: Decimal::ZERO,
            sold_value: Decimal::ZERO,
            progress_quantity: Decimal::ZERO,
            progress_value: Decimal::ZERO,
        };

        for t in &targets {
            let row = rows.entry(t.stock_item_id).or_insert_with(|| blank(t));
            row.target_quantity += t.quantity;
            row.target_value += t.value;
        }
        for s in &sold {
            let row = rows.entry(s.stock_item_id).or_insert_with(|| blank(s));
            row.sold_quantity += s.quantity;
            row.sold_value += s.value;
        }

        let mut items: Vec<ItemProgress> = rows.into_values().collect();
        for row in &mut items {
            row.progress_quantity = progress_pct(row.sold_quantity, row.target_quantity);
            row.progress_value = progress_pct(row.sold_value, row.target_value);
        }

        let total_target_quantity: Decimal = items.iter().map(|r| r.target_quantity).sum();
        let total_target_value: Decimal = items.iter().map(|r| r.target_value).sum();
        let total_sold_quantity: Decimal = items.iter().map(|r| r.sold_quantity).sum();
        let total_sold_value: Decimal = items.iter().map(|r| r.sold_value).sum();

        Self {
            date_from,
            date_to,
            progress_quantity: progress_pct(total_sold_quantity, total_target_quantity),
            progress_value: progress_pct(total_sold_value, total_target_value),
            items,
            total_target_quantity,
            total_target_value,
            total_sold_quantity,
            total_sold_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(id: i64, q: i64, v: i64) -> ItemAmount {
        ItemAmount {
            stock_item_id: id,
            stock_item_name: format!("item{id}"),
            quantity: Decimal::from(q),
            value: Decimal::from(v),
        }
    }

    #[test]
    fn invoice_suffix_only_for_multi_client_orders() {
        assert_eq!(invoice_number_for("FAC-001", 12, false), "FAC-001");
        assert_eq!(invoice_number_for("FAC-001", 12, true), "FAC-001-12");
    }

    #[test]
    fn shortfall_reported_when_one_unit_missing() {
        let required = BTreeMap::from([(1, Decimal::from(30)), (3, Decimal::from(10))]);
        let available = HashMap::from([(1, Decimal::from(25)), (3, Decimal::from(10))]);
        let names = HashMap::from([(1, "Riz".to_string())]);

        let shortfalls = compute_shortfalls(&required, &available, &names);

        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].stock_item_id, 1);
        assert_eq!(shortfalls[0].required, Decimal::from(30));
        assert_eq!(shortfalls[0].available, Decimal::from(25));
        assert_eq!(shortfalls[0].missing, Decimal::from(5));
    }

    #[test]
    fn item_absent_from_stock_counts_as_zero() {
        let required = BTreeMap::from([(9, Decimal::ONE)]);
        let shortfalls = compute_shortfalls(&required, &HashMap::new(), &HashMap::new());
        assert_eq!(shortfalls[0].available, Decimal::ZERO);
        assert_eq!(shortfalls[0].stock_item_name, "#9");
    }

    #[test]
    fn progress_handles_zero_target() {
        assert_eq!(progress_pct(Decimal::from(5), Decimal::ZERO), Decimal::ONE_HUNDRED);
        assert_eq!(progress_pct(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        assert_eq!(progress_pct(Decimal::from(25), Decimal::from(50)), Decimal::from(50));
    }

    #[test]
    fn report_merges_targets_and_sales_per_item() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        let report = ProgressReport::build(
            day,
            day,
            vec![amount(1, 100, 1000), amount(2, 10, 100)],
            vec![amount(1, 50, 400), amount(3, 5, 50)],
        );

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[0].progress_quantity, Decimal::from(50));
        assert_eq!(report.items[2].progress_quantity, Decimal::ONE_HUNDRED);
        assert_eq!(report.total_target_quantity, Decimal::from(110));
        assert_eq!(report.total_sold_value, Decimal::from(450));
    }
}
