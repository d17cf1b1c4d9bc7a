// src/services/document_service.rs

use genpdf::{elements, style, Element};
use image::Luma;
use qrcode::QrCode;
use rust_decimal::Decimal;

use crate::{
    common::error::AppError,
    db::Scope,
    models::logistics::{DocumentLine, OutgoingDetail},
    services::logistics_service::LogisticsService,
};

const FONT_FAMILY: &str = "Roboto";

#[derive(Clone)]
pub struct DocumentService {
    logistics: LogisticsService,
    fonts_dir: String,
}

impl DocumentService {
    pub fn new(logistics: LogisticsService, fonts_dir: String) -> Self {
        Self { logistics, fonts_dir }
    }

    /// Bon de livraison de uma saída visível no escopo. Devolve (nome do arquivo, bytes do PDF).
    pub async fn outgoing_pdf(&self, scope: &Scope, outgoing_id: i64) -> Result<(String, Vec<u8>), AppError> {
        let detail = self.logistics.get_outgoing(scope, outgoing_id).await?;
        let filename = delivery_note_filename(&detail.outgoing.reference);
        let fonts_dir = self.fonts_dir.clone();

        // Renderização é CPU pura
        let bytes = tokio::task::spawn_blocking(move || render_delivery_note(&fonts_dir, &detail))
            .await
            .map_err(|e| anyhow::anyhow!("Falha na task de geração do PDF: {}", e))??;

        tracing::info!(outgoing_id, bytes = bytes.len(), "📄 Bon de livraison gerado");
        Ok((filename, bytes))
    }
}

pub fn delivery_note_filename(reference: &str) -> String {
    format!("bon-livraison-{reference}.pdf")
}

fn line_total(line: &DocumentLine) -> Option<Decimal> {
    line.unit_price.map(|price| line.quantity * price)
}

fn format_gnf(value: Decimal) -> String {
    format!("{} GNF", value.round_dp(0))
}

fn pdf_error(e: impl ToString) -> AppError {
    AppError::InternalServerError(anyhow::Error::msg(e.to_string()))
}

fn render_delivery_note(fonts_dir: &str, detail: &OutgoingDetail) -> Result<Vec<u8>, AppError> {
    let outgoing = &detail.outgoing;

    let font_family = genpdf::fonts::from_files(fonts_dir, FONT_FAMILY, None)
        .map_err(|e| pdf_error(format!("Fonte não encontrada em {fonts_dir}: {e}")))?;

    let mut doc = genpdf::Document::new(font_family);
    doc.set_title(format!("Bon de livraison {}", outgoing.reference));
    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(10);
    doc.set_page_decorator(decorator);

    // --- CABEÇALHO ---
    doc.push(elements::Paragraph::new("BON DE LIVRAISON").styled(style::Style::new().bold().with_font_size(18)));
    doc.push(elements::Break::new(1.5));
    doc.push(
        elements::Paragraph::new(format!("Référence : {}", outgoing.reference))
            .styled(style::Style::new().bold().with_font_size(12)),
    );
    doc.push(elements::Paragraph::new(format!("Date : {}", outgoing.outgoing_date.format("%d/%m/%Y"))));
    doc.push(elements::Paragraph::new(format!("Client : {}", outgoing.client_name)));
    if let Some(phone) = &outgoing.client_phone {
        doc.push(elements::Paragraph::new(format!("Téléphone : {phone}")));
    }
    let source = match (outgoing.depot_id, outgoing.vehicle_id) {
        (Some(depot), _) => format!("Dépôt #{depot}"),
        (None, Some(vehicle)) => format!("Véhicule #{vehicle}"),
        (None, None) => "-".to_string(),
    };
    doc.push(elements::Paragraph::new(format!("Origine : {source}")));
    doc.push(elements::Break::new(2));

    // --- ITENS ---
    // Pesos das colunas: Produto (4), Qtd (1), Unitário (2), Total (2)
    let mut table = elements::TableLayout::new(vec![4, 1, 2, 2]);
    table.set_cell_decorator(elements::FrameCellDecorator::new(true, true, false));

    let bold = style::Style::new().bold();
    table
        .row()
        .element(elements::Paragraph::new("Article").styled(bold))
        .element(elements::Paragraph::new("Qté").styled(bold))
        .element(elements::Paragraph::new("Prix unitaire").styled(bold))
        .element(elements::Paragraph::new("Total").styled(bold))
        .push()
        .map_err(pdf_error)?;

    let mut grand_total = Decimal::ZERO;
    for line in &detail.lines {
        let total = line_total(line);
        grand_total += total.unwrap_or(Decimal::ZERO);
        table
            .row()
            .element(elements::Paragraph::new(line.stock_item_name.clone()))
            .element(elements::Paragraph::new(line.quantity.normalize().to_string()))
            .element(elements::Paragraph::new(line.unit_price.map(format_gnf).unwrap_or_else(|| "-".into())))
            .element(elements::Paragraph::new(total.map(format_gnf).unwrap_or_else(|| "-".into())))
            .push()
            .map_err(pdf_error)?;
    }
    doc.push(table);
    doc.push(elements::Break::new(2));

    let mut total_paragraph = elements::Paragraph::new(format!("TOTAL : {}", format_gnf(grand_total)));
    total_paragraph.set_alignment(genpdf::Alignment::Right);
    doc.push(total_paragraph.styled(style::Style::new().bold().with_font_size(12)));
    doc.push(elements::Break::new(2));

    // --- QR CODE DA REFERÊNCIA ---
    let code = QrCode::new(outgoing.reference.as_bytes()).map_err(pdf_error)?;
    let image_buffer = code.render::<Luma<u8>>().build();
    let dynamic_image = image::DynamicImage::ImageLuma8(image_buffer);
    let pdf_image = elements::Image::from_dynamic_image(dynamic_image)
        .map_err(pdf_error)?
        .with_scale(genpdf::Scale::new(0.5, 0.5));
    doc.push(pdf_image);

    if let Some(notes) = &outgoing.notes {
        doc.push(elements::Break::new(1));
        doc.push(elements::Paragraph::new(notes.clone()).styled(style::Style::new().italic().with_font_size(8)));
    }

    doc.push(elements::Break::new(3));
    doc.push(elements::Paragraph::new("Signature du client : ______________________"));

    let mut buffer = Vec::new();
    doc.render(&mut buffer).map_err(pdf_error)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::logistics::{DocumentStatus, StockOutgoing};
    use chrono::{NaiveDate, Utc};

    fn line(unit_price: Option<i64>) -> DocumentLine {
        DocumentLine {
            id: 1,
            stock_item_id: 5,
            stock_item_name: "Fer à béton 12mm".into(),
            quantity: Decimal::from(12),
            unit_price: unit_price.map(Decimal::from),
        }
    }

    #[test]
    fn filename_carries_reference() {
        assert_eq!(delivery_note_filename("OUT-20260115-0001"), "bon-livraison-OUT-20260115-0001.pdf");
    }

    #[test]
    fn line_total_needs_a_price() {
        assert_eq!(line_total(&line(Some(45_000))), Some(Decimal::from(540_000)));
        assert_eq!(line_total(&line(None)), None);
    }

    #[test]
    fn amounts_are_rounded_to_whole_francs() {
        assert_eq!(format_gnf(Decimal::new(1_500_049, 1)), "150005 GNF");
    }

    #[test]
    fn missing_fonts_are_an_internal_error() {
        let detail = OutgoingDetail {
            outgoing: StockOutgoing {
                id: 1,
                reference: "OUT-20260115-0001".into(),
                outgoing_date: NaiveDate::from_ymd_opt(2026, 1, 15).expect("date"),
                client_name: "Quincaillerie Sow".into(),
                client_phone: None,
                commercial_id: None,
                depot_id: Some(1),
                vehicle_id: None,
                order_id: None,
                order_client_id: None,
                user_id: 1,
                status: DocumentStatus::Completed,
                notes: None,
                created_at: Utc::now(),
            },
            lines: vec![line(Some(45_000))],
        };
        let err = render_delivery_note("/nonexistent/fonts", &detail).expect_err("fonts");
        assert!(matches!(err, AppError::InternalServerError(_)));
    }
}
