//! PDF output for customer quotes and stored estimates.
//!
//! Pages are US Letter using the built-in Helvetica faces, so no font files are
//! embedded. Text is limited to what WinAnsi can show; anything else is
//! replaced before it reaches the content stream.

use chrono::{DateTime, NaiveDate, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::estimates::{EstimateBreakdown, EstimateLineItem};
use crate::domain::f64_to_decimal;
use crate::error::ApiError;
use crate::services::estimator::{money, CostSource, DEFAULT_TAX_PERCENT};

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 36.0;
const CONTENT_TOP: f32 = PAGE_HEIGHT - MARGIN;
const CONTENT_BOTTOM: f32 = MARGIN + 24.0;
const RIGHT_EDGE: f32 = PAGE_WIDTH - MARGIN;
const ROW_HEIGHT: f32 = 14.0;
const BODY_SIZE: f32 = 9.0;

/// Days a generated quote stays valid
pub const QUOTE_VALID_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum PdfWriteError {
    #[error("Failed to encode page content: {0}")]
    Encode(String),

    #[error("Failed to write PDF: {0}")]
    Write(String),
}

impl From<PdfWriteError> for ApiError {
    fn from(err: PdfWriteError) -> Self {
        ApiError::Internal(anyhow::anyhow!(err))
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Replace characters Helvetica/WinAnsi cannot show.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{2033}' => '"',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\u{00D7}' => 'x',
            '\t' | '\n' | '\r' => ' ',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Approximate Helvetica advance widths in thousandths of an em
fn char_width(c: char) -> f32 {
    let units = match c {
        'i' | 'j' | 'l' => 222,
        ' ' | ',' | '.' | '/' | ':' | ';' | '!' | 'I' | '\'' | '[' | ']' => 278,
        'f' | 't' | 'r' | '(' | ')' | '-' => 333,
        'm' | 'M' => 833,
        'w' | 'C' | 'D' | 'G' | 'H' | 'N' | 'O' | 'Q' | 'R' | 'U' => 722,
        'W' => 944,
        '%' => 889,
        'A'..='Z' => 667,
        _ => 556,
    };
    units as f32 / 1000.0
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(char_width).sum::<f32>() * size
}

/// `$1,234.56`, rounded to cents
pub fn format_money(value: Decimal) -> String {
    let rounded = money(value);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = format!("{:.2}", rounded.abs());
    let (whole, cents) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, digit) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{}${}.{}", if negative { "-" } else { "" }, grouped, cents)
}

fn format_money_f64(value: f64) -> String {
    format_money(f64_to_decimal(value).unwrap_or_default())
}

fn format_qty(qty: Decimal) -> String {
    qty.round_dp(4).normalize().to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%m/%d/%Y").to_string()
}

// ============================================================================
// Page layout
// ============================================================================

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
}

#[derive(Clone, Copy)]
struct Column {
    title: &'static str,
    /// Left edge for left-aligned columns, right edge otherwise
    x: f32,
    align: Align,
    max_chars: usize,
}

const QUOTE_COLUMNS: &[Column] = &[
    Column { title: "Qty", x: 88.0, align: Align::Right, max_chars: 10 },
    Column { title: "Product Code", x: 96.0, align: Align::Left, max_chars: 16 },
    Column { title: "Description", x: 186.0, align: Align::Left, max_chars: 50 },
    Column { title: "Price", x: 472.0, align: Align::Right, max_chars: 14 },
    Column { title: "Unit", x: 480.0, align: Align::Left, max_chars: 5 },
    Column { title: "Total", x: RIGHT_EDGE - 4.0, align: Align::Right, max_chars: 16 },
];

const ESTIMATE_COLUMNS: &[Column] = &[
    Column { title: "Qty", x: 84.0, align: Align::Right, max_chars: 10 },
    Column { title: "Unit", x: 90.0, align: Align::Left, max_chars: 5 },
    Column { title: "Description", x: 124.0, align: Align::Left, max_chars: 40 },
    Column { title: "Source", x: 322.0, align: Align::Left, max_chars: 10 },
    Column { title: "Unit Price", x: 424.0, align: Align::Right, max_chars: 14 },
    Column { title: "Labor", x: 494.0, align: Align::Right, max_chars: 14 },
    Column { title: "Line Total", x: RIGHT_EDGE - 4.0, align: Align::Right, max_chars: 16 },
];

/// Top-down cursor over a growing list of pages.
struct Layout {
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
    repeat_header: Option<&'static [Column]>,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            y: CONTENT_TOP,
            repeat_header: None,
        }
    }

    fn new_page(&mut self) {
        let finished = std::mem::take(&mut self.ops);
        self.pages.push(finished);
        self.y = CONTENT_TOP;
        if let Some(columns) = self.repeat_header {
            self.table_header(columns);
        }
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < CONTENT_BOTTOM {
            self.new_page();
        }
    }

    fn advance(&mut self, height: f32) {
        self.y -= height;
    }

    fn text_at(&mut self, x: f32, y: f32, size: f32, font: Font, text: &str) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource().into(), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(sanitize(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn text_right_at(&mut self, right: f32, y: f32, size: f32, font: Font, text: &str) {
        let clean = sanitize(text);
        let x = right - text_width(&clean, size);
        self.text_at(x, y, size, font, &clean);
    }

    /// One line of text at the cursor, moving the cursor below it
    fn line(&mut self, size: f32, font: Font, text: &str) {
        let height = size + 4.0;
        self.ensure(height);
        self.advance(height);
        let y = self.y + 3.0;
        self.text_at(MARGIN, y, size, font, text);
    }

    fn rule(&mut self, width: f32) {
        self.ensure(6.0);
        self.advance(4.0);
        self.ops.extend([
            Operation::new("w", vec![width.into()]),
            Operation::new("m", vec![MARGIN.into(), self.y.into()]),
            Operation::new("l", vec![RIGHT_EDGE.into(), self.y.into()]),
            Operation::new("S", vec![]),
        ]);
        self.advance(2.0);
    }

    fn band(&mut self, height: f32, gray: f32) {
        self.ops.extend([
            Operation::new("g", vec![gray.into()]),
            Operation::new(
                "re",
                vec![MARGIN.into(), self.y.into(), (RIGHT_EDGE - MARGIN).into(), height.into()],
            ),
            Operation::new("f", vec![]),
            Operation::new("g", vec![0.0f32.into()]),
        ]);
    }

    fn table_header(&mut self, columns: &'static [Column]) {
        self.ensure(ROW_HEIGHT + 2.0);
        self.advance(ROW_HEIGHT + 2.0);
        self.band(ROW_HEIGHT + 2.0, 0.2);
        self.ops.push(Operation::new("g", vec![1.0f32.into()]));
        let y = self.y + 5.0;
        for column in columns {
            self.cell(column, y, Font::Bold, column.title);
        }
        self.ops.push(Operation::new("g", vec![0.0f32.into()]));
    }

    fn cell(&mut self, column: &Column, y: f32, font: Font, text: &str) {
        let text = truncate(&sanitize(text), column.max_chars);
        match column.align {
            Align::Left => self.text_at(column.x, y, BODY_SIZE, font, &text),
            Align::Right => self.text_right_at(column.x, y, BODY_SIZE, font, &text),
        }
    }

    fn row(&mut self, columns: &[Column], cells: &[String]) {
        self.ensure(ROW_HEIGHT);
        self.advance(ROW_HEIGHT);
        let y = self.y + 4.0;
        for (column, value) in columns.iter().zip(cells) {
            self.cell(column, y, Font::Regular, value);
        }
    }

    fn section_band(&mut self, title: &str) {
        self.ensure(ROW_HEIGHT * 2.0);
        self.advance(ROW_HEIGHT);
        self.band(ROW_HEIGHT, 0.93);
        let y = self.y + 4.0;
        self.text_at(MARGIN + 4.0, y, BODY_SIZE + 1.0, Font::Bold, title);
    }

    /// Right-aligned label/value pair, as used by subtotal and totals blocks
    fn total_row(&mut self, label: &str, value: &str, font: Font, size: f32) {
        self.ensure(size + 6.0);
        self.advance(size + 6.0);
        let y = self.y + 4.0;
        self.text_right_at(RIGHT_EDGE - 110.0, y, size, font, label);
        self.text_right_at(RIGHT_EDGE - 4.0, y, size, font, value);
    }

    fn finish(mut self) -> Result<Vec<u8>, PdfWriteError> {
        if !self.ops.is_empty() || self.pages.is_empty() {
            let last = std::mem::take(&mut self.ops);
            self.pages.push(last);
        }
        let total_pages = self.pages.len();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(total_pages);
        for (idx, mut operations) in self.pages.into_iter().enumerate() {
            let footer = format!("Page {} of {}", idx + 1, total_pages);
            let x = RIGHT_EDGE - text_width(&footer, 8.0);
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 8.0f32.into()]),
                Operation::new("Td", vec![x.into(), (MARGIN - 8.0).into()]),
                Operation::new("Tj", vec![Object::string_literal(footer)]),
                Operation::new("ET", vec![]),
            ]);

            let content = Content { operations }
                .encode()
                .map_err(|e| PdfWriteError::Encode(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total_pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0i64.into(), 0i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| PdfWriteError::Write(e.to_string()))?;
        Ok(out)
    }
}

// ============================================================================
// Customer quote
// ============================================================================

/// `Q` + `yyMMdd` + four digits taken from `seed`
pub fn quote_number(date: NaiveDate, seed: Uuid) -> String {
    format!("Q{}{:04}", date.format("%y%m%d"), seed.as_u128() % 10_000)
}

/// Attachment name `<quote_number>_<job_number>.pdf`
pub fn quote_filename(quote_number: &str, job_number: Option<&str>) -> String {
    let job: String = job_number
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if job.is_empty() {
        format!("{}.pdf", quote_number)
    } else {
        format!("{}_{}.pdf", quote_number, job)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompanyBlock {
    pub name: String,
    pub address_lines: Vec<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerBlock {
    pub customer_name: Option<String>,
    pub contact: Option<String>,
    pub job_name: String,
    pub job_number: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QuoteLine {
    pub category: String,
    pub qty: Decimal,
    pub product_code: String,
    pub description: String,
    pub unit_price: Decimal,
    pub unit: String,
}

impl QuoteLine {
    pub fn line_total(&self) -> Decimal {
        money(self.qty * self.unit_price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteTotals {
    pub subtotal: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

#[derive(Debug, Clone)]
pub struct QuoteDocument {
    pub company: CompanyBlock,
    pub customer: CustomerBlock,
    pub quote_number: String,
    pub quote_date: NaiveDate,
    pub lines: Vec<QuoteLine>,
    pub tax_percentage: Option<Decimal>,
    /// Stored quotes carry their own expiry; otherwise the standard validity applies
    pub expires_on: Option<NaiveDate>,
    pub delivery: Option<String>,
    pub special_instructions: Option<String>,
}

/// Subtotal, tax and grand total over already-rounded line totals.
pub fn quote_totals(
    line_totals: impl IntoIterator<Item = Decimal>,
    tax_percentage: Option<Decimal>,
) -> QuoteTotals {
    let subtotal: Decimal = line_totals.into_iter().sum();
    let tax_percentage = tax_percentage.unwrap_or(DEFAULT_TAX_PERCENT);
    let tax_amount = money(subtotal * tax_percentage / Decimal::ONE_HUNDRED);
    QuoteTotals {
        subtotal,
        tax_percentage,
        tax_amount,
        grand_total: subtotal + tax_amount,
    }
}

impl QuoteDocument {
    pub fn expiration_date(&self) -> NaiveDate {
        self.expires_on
            .unwrap_or_else(|| self.quote_date + chrono::Duration::days(QUOTE_VALID_DAYS))
    }

    /// Lines grouped by category, categories in name order
    pub fn by_category(&self) -> BTreeMap<&str, Vec<&QuoteLine>> {
        let mut groups: BTreeMap<&str, Vec<&QuoteLine>> = BTreeMap::new();
        for line in &self.lines {
            let category = line.category.trim();
            let key = if category.is_empty() { "Miscellaneous" } else { category };
            groups.entry(key).or_default().push(line);
        }
        groups
    }

    pub fn totals(&self) -> QuoteTotals {
        quote_totals(self.lines.iter().map(QuoteLine::line_total), self.tax_percentage)
    }
}

fn company_header(layout: &mut Layout, company: &CompanyBlock, title: &str, facts: &[(&str, String)]) {
    let top = layout.y;
    layout.line(20.0, Font::Bold, &company.name);
    for line in &company.address_lines {
        layout.line(BODY_SIZE, Font::Regular, line);
    }
    if let Some(phone) = &company.phone {
        layout.line(BODY_SIZE, Font::Regular, &format!("Phone: {}", phone));
    }
    let left_bottom = layout.y;

    let mut y = top - 20.0;
    layout.text_right_at(RIGHT_EDGE, y, 18.0, Font::Bold, title);
    for (label, value) in facts {
        y -= 13.0;
        let value_width = text_width(&sanitize(value), BODY_SIZE);
        layout.text_right_at(RIGHT_EDGE, y, BODY_SIZE, Font::Regular, value);
        layout.text_right_at(RIGHT_EDGE - value_width - 4.0, y, BODY_SIZE, Font::Bold, label);
    }

    layout.y = left_bottom.min(y - 4.0);
    layout.rule(2.0);
}

fn labelled_rows(layout: &mut Layout, rows: &[(&str, String)]) {
    for (label, value) in rows {
        layout.ensure(ROW_HEIGHT - 2.0);
        layout.advance(ROW_HEIGHT - 2.0);
        let y = layout.y + 3.0;
        layout.text_at(MARGIN, y, BODY_SIZE, Font::Bold, label);
        layout.text_at(MARGIN + 80.0, y, BODY_SIZE, Font::Regular, &truncate(value, 90));
    }
}

pub fn render_quote(quote: &QuoteDocument) -> Result<Vec<u8>, PdfWriteError> {
    let mut layout = Layout::new();

    company_header(
        &mut layout,
        &quote.company,
        "Quotation",
        &[
            ("Quote No:", quote.quote_number.clone()),
            ("Quote Date:", format_date(quote.quote_date)),
            ("Expiration:", format_date(quote.expiration_date())),
        ],
    );

    let customer = &quote.customer;
    let job = match &customer.job_number {
        Some(number) => format!("{} (#{})", customer.job_name, number),
        None => customer.job_name.clone(),
    };
    labelled_rows(
        &mut layout,
        &[
            ("Customer:", customer.customer_name.clone().unwrap_or_else(|| "N/A".into())),
            ("Contact:", customer.contact.clone().unwrap_or_default()),
            ("Job:", job),
            ("Location:", customer.location.clone().unwrap_or_default()),
            ("Delivery:", quote.delivery.clone().unwrap_or_else(|| "TBD".into())),
        ],
    );
    layout.advance(8.0);

    layout.table_header(QUOTE_COLUMNS);
    layout.repeat_header = Some(QUOTE_COLUMNS);
    for (category, lines) in quote.by_category() {
        layout.section_band(category);
        let mut category_total = Decimal::ZERO;
        for line in lines {
            let total = line.line_total();
            category_total += total;
            layout.row(
                QUOTE_COLUMNS,
                &[
                    format_qty(line.qty),
                    line.product_code.clone(),
                    line.description.clone(),
                    format_money(line.unit_price),
                    line.unit.clone(),
                    format_money(total),
                ],
            );
        }
        layout.total_row(
            &format!("End of {}", category),
            &format_money(category_total),
            Font::Bold,
            BODY_SIZE,
        );
        layout.advance(4.0);
    }
    layout.repeat_header = None;

    let totals = quote.totals();
    layout.rule(1.0);
    layout.total_row("Subtotal:", &format_money(totals.subtotal), Font::Bold, 10.0);
    layout.total_row(
        &format!("Sales Tax {:.1}%:", totals.tax_percentage),
        &format_money(totals.tax_amount),
        Font::Regular,
        10.0,
    );
    layout.total_row("Quotation Total:", &format_money(totals.grand_total), Font::Bold, 12.0);

    layout.advance(12.0);
    if let Some(instructions) = &quote.special_instructions {
        layout.line(BODY_SIZE, Font::Bold, "Special Instructions:");
        for line in wrap(instructions, 110) {
            layout.line(BODY_SIZE, Font::Regular, &line);
        }
        layout.advance(6.0);
    }
    layout.line(
        8.0,
        Font::Regular,
        &format!(
            "Prices valid through {}. Quantities are taken from plan takeoff and should be verified before ordering.",
            format_date(quote.expiration_date())
        ),
    );

    layout.finish()
}

// ============================================================================
// Stored estimate
// ============================================================================

#[derive(Debug, Clone)]
pub struct EstimateDocument {
    pub company: CompanyBlock,
    pub project_name: String,
    pub job_number: Option<String>,
    pub estimate_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub breakdown: EstimateBreakdown,
    pub confidence_score: f64,
    pub line_items: Vec<EstimateLineItem>,
    pub notes: Option<String>,
}

fn source_label(source: CostSource) -> &'static str {
    match source {
        CostSource::Quote => "Quote",
        CostSource::Catalog => "Catalog",
        CostSource::AutoMatch => "Auto-match",
        CostSource::Unmatched => "Unpriced",
    }
}

pub fn render_estimate(estimate: &EstimateDocument) -> Result<Vec<u8>, PdfWriteError> {
    let mut layout = Layout::new();
    let short_id: String = estimate.estimate_id.to_string().chars().take(8).collect();

    company_header(
        &mut layout,
        &estimate.company,
        "Estimate",
        &[
            ("Estimate:", short_id.to_uppercase()),
            ("Date:", format_date(estimate.created_at.date_naive())),
            ("Coverage:", format!("{:.0}%", estimate.confidence_score * 100.0)),
        ],
    );

    let mut project_rows = vec![("Project:", estimate.project_name.clone())];
    if let Some(number) = &estimate.job_number {
        project_rows.push(("Job Number:", number.clone()));
    }
    labelled_rows(&mut layout, &project_rows);
    layout.advance(8.0);

    layout.table_header(ESTIMATE_COLUMNS);
    layout.repeat_header = Some(ESTIMATE_COLUMNS);
    for item in &estimate.line_items {
        let description = match &item.priced_as {
            Some(priced_as) if !priced_as.eq_ignore_ascii_case(&item.label) => {
                format!("{} ({})", item.label, priced_as)
            }
            _ => item.label.clone(),
        };
        layout.row(
            ESTIMATE_COLUMNS,
            &[
                format_qty(f64_to_decimal(item.qty).unwrap_or_default()),
                item.unit.clone(),
                description,
                source_label(item.source).to_string(),
                item.unit_price.map(format_money_f64).unwrap_or_else(|| "-".into()),
                format_money_f64(item.labor_cost),
                format_money_f64(item.line_total),
            ],
        );
    }
    layout.repeat_header = None;

    let b = &estimate.breakdown;
    layout.rule(1.0);
    layout.total_row("Materials Cost:", &format_money_f64(b.materials_cost), Font::Regular, 10.0);
    if b.labor_cost > 0.0 {
        layout.total_row("Labor Cost:", &format_money_f64(b.labor_cost), Font::Regular, 10.0);
    }
    if b.equipment_cost > 0.0 {
        layout.total_row("Equipment Cost:", &format_money_f64(b.equipment_cost), Font::Regular, 10.0);
    }
    if b.subcontractor_cost > 0.0 {
        layout.total_row(
            "Subcontractor Cost:",
            &format_money_f64(b.subcontractor_cost),
            Font::Regular,
            10.0,
        );
    }
    layout.total_row("Direct Cost:", &format_money_f64(b.direct_cost), Font::Bold, 10.0);
    layout.total_row(
        &format!("Overhead ({:.1}%):", b.overhead_percentage),
        &format_money_f64(b.overhead),
        Font::Regular,
        10.0,
    );
    layout.total_row(
        &format!("Profit ({:.1}%):", b.profit_percentage),
        &format_money_f64(b.profit),
        Font::Regular,
        10.0,
    );
    layout.total_row("Total Amount:", &format_money_f64(b.total_cost), Font::Bold, 10.0);
    layout.total_row(
        &format!("Sales Tax {:.1}%:", b.tax_percentage),
        &format_money_f64(b.tax_amount),
        Font::Regular,
        10.0,
    );
    layout.total_row("Estimate Total:", &format_money_f64(b.grand_total), Font::Bold, 12.0);

    if let Some(notes) = estimate.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        layout.advance(10.0);
        layout.line(10.0, Font::Bold, "Notes");
        for line in wrap(notes, 110) {
            layout.line(BODY_SIZE, Font::Regular, &line);
        }
    }

    layout.finish()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A one-page document for tests that need real PDF bytes.
    pub fn sample_pdf() -> Vec<u8> {
        render_quote(&sample_quote(3)).expect("render sample quote")
    }

    fn sample_quote(lines: usize) -> QuoteDocument {
        let categories = ["Walls", "Floors", "Roofing"];
        QuoteDocument {
            company: CompanyBlock {
                name: "Acme Builders".into(),
                address_lines: vec!["100 Main St".into(), "Baton Rouge, LA 70801".into()],
                phone: Some("225-555-0100".into()),
            },
            customer: CustomerBlock {
                customer_name: Some("Riverside Health".into()),
                contact: Some("Dana Ortiz".into()),
                job_name: "Riverside Clinic".into(),
                job_number: Some("J-2024-017".into()),
                location: Some("Lafayette, LA".into()),
            },
            quote_number: "Q2407011234".into(),
            quote_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            lines: (0..lines)
                .map(|i| QuoteLine {
                    category: categories[i % 3].into(),
                    qty: Decimal::from(10 + i as i64),
                    product_code: format!("SKU-{:03}", i),
                    description: format!("Item {} \u{2013} 2\u{00D7}4 stud", i),
                    unit_price: Decimal::new(1895, 2),
                    unit: "EA".into(),
                })
                .collect(),
            tax_percentage: None,
            expires_on: None,
            delivery: None,
            special_instructions: None,
        }
    }

    #[test]
    fn quote_number_has_date_and_four_digits() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let number = quote_number(date, Uuid::from_u128(123_456_789));
        assert_eq!(number, "Q2407016789");
        assert_eq!(quote_number(date, Uuid::from_u128(7)), "Q2407010007");
    }

    #[test]
    fn filenames_drop_unsafe_job_characters() {
        assert_eq!(quote_filename("Q2407010007", Some("J 2024/17")), "Q2407010007_J202417.pdf");
        assert_eq!(quote_filename("Q2407010007", None), "Q2407010007.pdf");
    }

    #[test]
    fn money_formatting_groups_thousands() {
        assert_eq!(format_money(Decimal::new(123456789, 2)), "$1,234,567.89");
        assert_eq!(format_money(Decimal::new(5, 1)), "$0.50");
        assert_eq!(format_money(Decimal::new(-100005, 3)), "-$100.01");
        assert_eq!(format_money(Decimal::ZERO), "$0.00");
    }

    #[test]
    fn totals_apply_default_tax() {
        let quote = sample_quote(2);
        let totals = quote.totals();
        // 10 and 11 units at 18.95
        assert_eq!(totals.subtotal, Decimal::new(39795, 2));
        assert_eq!(totals.tax_percentage, DEFAULT_TAX_PERCENT);
        assert_eq!(totals.tax_amount, Decimal::new(3582, 2));
        assert_eq!(totals.grand_total, Decimal::new(43377, 2));
        assert_eq!(quote.expiration_date(), NaiveDate::from_ymd_opt(2024, 7, 8).unwrap());
    }

    #[test]
    fn categories_are_sorted_and_blank_is_miscellaneous() {
        let mut quote = sample_quote(3);
        quote.lines[0].category = "  ".into();
        let keys: Vec<&str> = quote.by_category().keys().copied().collect();
        assert_eq!(keys, vec!["Floors", "Miscellaneous", "Roofing"]);
    }

    #[test]
    fn sanitize_replaces_non_winansi_text() {
        assert_eq!(sanitize("2\u{00D7}4 \u{2013} \u{201C}S4S\u{201D}"), "2x4 - \"S4S\"");
        assert_eq!(sanitize("caf\u{00E9}\n"), "caf? ");
    }

    #[test]
    fn wrap_breaks_on_words() {
        assert_eq!(
            wrap("alpha beta gamma delta", 11),
            vec!["alpha beta", "gamma delta"]
        );
    }

    #[test]
    fn stored_quote_keeps_its_own_terms() {
        let mut quote = sample_quote(1);
        quote.expires_on = Some(NaiveDate::from_ymd_opt(2024, 7, 31).unwrap());
        quote.delivery = Some("Jobsite, 412 Levee Rd".into());
        quote.special_instructions = Some("Call the superintendent one day before delivery.".into());
        assert_eq!(quote.expiration_date(), NaiveDate::from_ymd_opt(2024, 7, 31).unwrap());

        let doc = Document::load_mem(&render_quote(&quote).unwrap()).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn explicit_tax_overrides_default() {
        let totals = quote_totals([Decimal::new(10000, 2), Decimal::new(5050, 2)], Some(Decimal::ZERO));
        assert_eq!(totals.subtotal, Decimal::new(15050, 2));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.grand_total, Decimal::new(15050, 2));

        let taxed = quote_totals([Decimal::new(10000, 2)], Some(Decimal::new(825, 2)));
        assert_eq!(taxed.tax_amount, Decimal::new(825, 2));
        assert_eq!(taxed.grand_total, Decimal::new(10825, 2));
    }

    #[test]
    fn short_quote_fits_one_page() {
        let bytes = sample_pdf();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn long_quotes_paginate() {
        let bytes = render_quote(&sample_quote(120)).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.get_pages().len() >= 3);
    }

    #[test]
    fn estimate_renders_with_notes() {
        let line = EstimateLineItem {
            takeoff_item_id: Uuid::new_v4(),
            label: "2x4 studs".into(),
            qty: 1200.0,
            unit: "EA".into(),
            category: Some("Walls".into()),
            source: CostSource::Catalog,
            material_id: Some(Uuid::new_v4()),
            quote_id: None,
            priced_as: Some("2x4x8 SPF Stud".into()),
            unit_price: Some(3.25),
            material_cost: 3900.0,
            labor_hours: 2400.0,
            labor_cost: 84000.0,
            equipment_cost: 0.0,
            line_total: 87900.0,
            confidence: 0.92,
        };
        let estimate = EstimateDocument {
            company: CompanyBlock {
                name: "Acme Builders".into(),
                ..Default::default()
            },
            project_name: "Riverside Clinic".into(),
            job_number: None,
            estimate_id: Uuid::new_v4(),
            created_at: Utc::now(),
            breakdown: EstimateBreakdown::from_columns([Decimal::ONE; 13]),
            confidence_score: 1.0,
            line_items: vec![line],
            notes: Some("Excludes site work. ".repeat(30)),
        };
        let bytes = render_estimate(&estimate).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
