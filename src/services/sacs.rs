//! SACS Registry Scraper
//!
//! Drives the SACS professional-search form
//! (<https://sistemas.sacs.gob.ve/consultas/prfsnal_salud>) with a headless
//! Chromium session. The form is xajax-driven and slow: navigation and
//! submission are retried, results are polled, and candidate cédula
//! formats (raw and zero-padded) are tried in turn because the registry is
//! inconsistent about leading zeros.
//!
//! One browser process is shared across jobs and relaunched when it dies;
//! every job gets its own page, closed on every exit path by a session
//! guard, including mid-flight when the timeout supervisor drops the
//! scrape future.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::verification::{
    DocumentType, PostgraduateRecord, ProfessionRecord, VerificationKey,
};
use crate::services::classifier;
use crate::services::scraper::{RegistryRecord, RegistryScraper, ScrapeError};

const LAUNCH_ATTEMPTS: u64 = 3;
const LAUNCH_BACKOFF_MS: u64 = 1200;
const NAVIGATION_ATTEMPTS: u64 = 3;
const NAVIGATION_BACKOFF_MS: u64 = 1500;
const SELECTOR_WAIT_MS: u64 = 20_000;
const SELECTOR_POLL_MS: u64 = 500;
const FORM_SETTLE_MS: u64 = 500;
// The xajax backend sometimes lags behind the nationality change.
const XAJAX_SETTLE_MS: u64 = 1000;
const SUBMIT_ATTEMPTS: u64 = 2;
const RESULT_WAIT_BASE_MS: u64 = 45_000;
const RESULT_WAIT_STEP_MS: u64 = 5_000;
const RESULT_POLL_MS: u64 = 1200;
const RESULT_RENDER_MS: u64 = 2200;
const POSTGRADUATE_RENDER_MS: u64 = 4000;

const LINUX_CHROME_PATHS: [&str; 4] = [
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
];

/// What the result region of the page currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultState {
    Complete,
    NoResult,
    Pending,
}

/// Production [`RegistryScraper`] backed by headless Chromium.
pub struct SacsScraper {
    base_url: String,
    chrome_executable: Option<PathBuf>,
    browser: tokio::sync::Mutex<Option<Browser>>,
}

impl SacsScraper {
    pub fn new(base_url: &str, chrome_executable: Option<PathBuf>) -> Self {
        Self {
            base_url: base_url.to_string(),
            chrome_executable,
            browser: tokio::sync::Mutex::new(None),
        }
    }

    fn resolve_chrome(&self) -> Option<PathBuf> {
        if let Some(path) = &self.chrome_executable {
            return Some(path.clone());
        }
        LINUX_CHROME_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    async fn try_launch(&self) -> Result<Browser, ScrapeError> {
        let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--ignore-certificate-errors",
            "--disable-dev-shm-usage",
        ]);
        if let Some(path) = self.resolve_chrome() {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ScrapeError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(browser)
    }

    async fn launch_browser(&self) -> Result<Browser, ScrapeError> {
        let mut last_error = None;
        for attempt in 1..=LAUNCH_ATTEMPTS {
            info!(attempt, max = LAUNCH_ATTEMPTS, "launching shared browser");
            match self.try_launch().await {
                Ok(browser) => return Ok(browser),
                Err(err) => {
                    warn!(attempt, error = %err, "browser launch failed");
                    last_error = Some(err);
                    sleep(Duration::from_millis(LAUNCH_BACKOFF_MS * attempt)).await;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ScrapeError::Launch("no launch attempt ran".to_string())))
    }

    /// Open a fresh page on the shared browser, relaunching it if it has
    /// gone away since the last job.
    async fn new_session(&self) -> Result<SessionGuard, ScrapeError> {
        let mut slot = self.browser.lock().await;

        if let Some(browser) = slot.as_ref() {
            match browser.new_page("about:blank").await {
                Ok(page) => return Ok(SessionGuard::new(page)),
                Err(err) => {
                    warn!(error = %err, "shared browser unavailable, relaunching");
                    *slot = None;
                }
            }
        }

        let browser = self.launch_browser().await?;
        let page = browser.new_page("about:blank").await?;
        *slot = Some(browser);
        Ok(SessionGuard::new(page))
    }

    async fn wait_for_selector(&self, page: &Page, selector: &str) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + Duration::from_millis(SELECTOR_WAIT_MS);
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::Navigation(format!(
                    "selector {selector} did not appear"
                )));
            }
            sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
        }
    }

    async fn navigate_to_form(&self, page: &Page) -> Result<(), ScrapeError> {
        let mut last_error = None;
        for attempt in 1..=NAVIGATION_ATTEMPTS {
            debug!(attempt, url = %self.base_url, "navigating to search form");
            let outcome = async {
                page.goto(self.base_url.as_str()).await?;
                self.wait_for_selector(page, "#tipo").await?;
                self.wait_for_selector(page, "#datajs").await
            }
            .await;

            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "navigation to search form failed");
                    last_error = Some(err);
                    if attempt < NAVIGATION_ATTEMPTS {
                        sleep(Duration::from_millis(NAVIGATION_BACKOFF_MS * attempt)).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ScrapeError::Navigation("no navigation attempt ran".to_string())))
    }

    /// Select search-by-cédula and the nationality, waiting for the
    /// xajax-driven form to catch up after each change.
    async fn prepare_form(
        &self,
        page: &Page,
        document_type: DocumentType,
    ) -> Result<(), ScrapeError> {
        page.evaluate(
            r#"(() => {
                const sel = document.getElementById('tipo');
                if (sel) {
                    sel.value = '1';
                    sel.dispatchEvent(new Event('change', { bubbles: true }));
                }
            })()"#,
        )
        .await?;
        sleep(Duration::from_millis(FORM_SETTLE_MS)).await;

        page.evaluate(format!(
            r#"(() => {{
                const sel = document.getElementById('datajs');
                if (sel) {{
                    sel.value = '{document_type}';
                    sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }}
            }})()"#
        ))
        .await?;
        sleep(Duration::from_millis(XAJAX_SETTLE_MS)).await;
        Ok(())
    }

    /// Fill the cédula input and fire the search through whichever entry
    /// point this revision of the page exposes.
    async fn submit_query(
        &self,
        page: &Page,
        candidate: &str,
        api_cedula: &str,
    ) -> Result<(), ScrapeError> {
        page.evaluate(format!(
            r#"(() => {{
                const input = document.getElementById('cedula_matricula');
                if (input) {{
                    input.value = '{candidate}';
                    input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    input.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }}

                if (typeof xajax_getPrfsnalByCed === 'function') {{
                    xajax_getPrfsnalByCed('{api_cedula}');
                    return;
                }}

                if (typeof nroRegistro === 'function') {{
                    nroRegistro('{candidate}');
                    nroRegistro();
                }}

                const boton = document.querySelector('a.btn.btn-lg.btn-primary');
                if (boton) boton.click();
            }})()"#
        ))
        .await?;
        Ok(())
    }

    async fn wait_for_result(
        &self,
        page: &Page,
        expected_cedula: &str,
        timeout: Duration,
    ) -> Result<ResultState, ScrapeError> {
        let started = Instant::now();
        loop {
            let html = page.content().await?;
            let state = detect_result_state(&html, expected_cedula);
            if state != ResultState::Pending {
                return Ok(state);
            }
            if started.elapsed() >= timeout {
                return Ok(ResultState::Pending);
            }
            sleep(Duration::from_millis(RESULT_POLL_MS)).await;
        }
    }

    async fn open_postgraduates(&self, page: &Page) -> Result<(), ScrapeError> {
        page.evaluate(
            r#"(() => {
                const boton = document.querySelector('#profesional tbody tr:first-child button');
                if (boton) boton.click();
            })()"#,
        )
        .await?;
        sleep(Duration::from_millis(POSTGRADUATE_RENDER_MS)).await;
        Ok(())
    }
}

#[async_trait]
impl RegistryScraper for SacsScraper {
    async fn scrape(&self, key: &VerificationKey) -> Result<RegistryRecord, ScrapeError> {
        info!(key = %key, "starting registry scrape");

        let session = self.new_session().await?;
        let page = session.page();

        self.navigate_to_form(page).await?;
        self.prepare_form(page, key.document_type).await?;

        let candidates = candidate_cedulas(&key.cedula);
        debug!(key = %key, ?candidates, "cédula formats to try");

        let mut saw_no_result = false;
        let mut completed = false;
        'candidates: for candidate in &candidates {
            let api_cedula = format!("{}-{}", key.document_type, compact_cedula(candidate));

            for attempt in 1..=SUBMIT_ATTEMPTS {
                debug!(candidate = %candidate, attempt, "submitting query");
                self.submit_query(page, candidate, &api_cedula).await?;

                let timeout =
                    Duration::from_millis(RESULT_WAIT_BASE_MS + attempt * RESULT_WAIT_STEP_MS);
                match self.wait_for_result(page, candidate, timeout).await? {
                    ResultState::Complete => {
                        debug!(candidate = %candidate, "complete result detected");
                        // Let xajax finish rendering the tables.
                        sleep(Duration::from_millis(RESULT_RENDER_MS)).await;
                        completed = true;
                        break 'candidates;
                    }
                    ResultState::NoResult => {
                        debug!(candidate = %candidate, "registry answered with no result");
                        saw_no_result = true;
                        continue 'candidates;
                    }
                    ResultState::Pending => {
                        debug!(candidate = %candidate, attempt, "partial timeout, retrying");
                        sleep(Duration::from_millis(XAJAX_SETTLE_MS)).await;
                    }
                }
            }
        }

        if !completed {
            session.close().await;
            if saw_no_result {
                info!(key = %key, "registry has no record for this cédula");
                return Ok(RegistryRecord::not_found());
            }
            return Err(ScrapeError::ResultPending);
        }

        let html = page.content().await?;
        let (basic_fields, professions) = parse_profile(&html);

        let mut postgraduates = Vec::new();
        if professions.first().is_some_and(|p| p.has_postgraduate) {
            // Postgraduate rows are a best-effort enrichment.
            match self.open_postgraduates(page).await {
                Ok(()) => {
                    if let Ok(html) = page.content().await {
                        postgraduates = parse_postgraduates(&html);
                    }
                }
                Err(err) => warn!(key = %key, error = %err, "could not open postgraduate table"),
            }
        }

        session.close().await;

        let has_name = basic_fields
            .iter()
            .any(|(k, v)| classifier::normalize(k).contains("NOMBRE") && !v.trim().is_empty());

        if !has_name || professions.is_empty() {
            info!(key = %key, "result page is missing name or professions");
            return Ok(RegistryRecord::not_found());
        }

        info!(
            key = %key,
            professions = professions.len(),
            postgraduates = postgraduates.len(),
            "registry scrape complete"
        );
        Ok(RegistryRecord {
            found: true,
            basic_fields,
            professions,
            postgraduates,
        })
    }
}

/// Closes the page on every exit path. Explicit `close` on the normal
/// path; `Drop` covers errors and supervisor cancellation, where the
/// close has to be spawned because drop cannot await.
struct SessionGuard {
    page: Option<Page>,
}

impl SessionGuard {
    fn new(page: Page) -> Self {
        Self { page: Some(page) }
    }

    fn page(&self) -> &Page {
        // `page` is only vacated by `close`, which consumes the guard.
        self.page.as_ref().expect("session already closed")
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "page close failed");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }
}

/// Cédula formats to try against the form: the canonical digits plus
/// zero-padded variants, since the registry is inconsistent about leading
/// zeros.
fn candidate_cedulas(cedula: &str) -> Vec<String> {
    let compact = compact_cedula(cedula);
    let mut candidates = vec![
        compact.clone(),
        format!("{compact:0>8}"),
        format!("{compact:0>9}"),
        format!("{compact:0>10}"),
    ];
    candidates.retain(|c| (6..=10).contains(&c.len()) && c.bytes().all(|b| b.is_ascii_digit()));
    let mut seen = Vec::new();
    for candidate in candidates {
        if !seen.contains(&candidate) {
            seen.push(candidate);
        }
    }
    seen
}

fn compact_cedula(value: &str) -> String {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        digits
    } else {
        trimmed.to_string()
    }
}

fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

/// The value cell of a personal-data row: the bolded text when present,
/// the whole cell otherwise.
fn row_value(row: ElementRef<'_>) -> String {
    let td_b = Selector::parse("td b").expect("valid selector");
    let td = Selector::parse("td").expect("valid selector");
    row.select(&td_b)
        .next()
        .or_else(|| row.select(&td).next())
        .map(element_text)
        .unwrap_or_default()
}

fn detect_result_state(html: &str, expected_cedula: &str) -> ResultState {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse("#tableUser table tbody tr").expect("valid selector");
    let th_sel = Selector::parse("th").expect("valid selector");
    let profession_cell_sel = Selector::parse("#profesional tbody tr td").expect("valid selector");

    let expected_compact = compact_cedula(expected_cedula);
    let rows: Vec<_> = document.select(&row_sel).collect();

    let mut has_cedula = false;
    let mut has_name = false;
    for row in &rows {
        let header = row
            .select(&th_sel)
            .next()
            .map(|th| classifier::normalize(&element_text(th)))
            .unwrap_or_default();
        let value = row_value(*row);
        if header.contains("CEDULA") && compact_cedula(&value) == expected_compact {
            has_cedula = true;
        }
        if header.contains("NOMBRE") && !value.is_empty() {
            has_name = true;
        }
    }

    if has_cedula && has_name {
        return ResultState::Complete;
    }

    let page_text = classifier::normalize(&document.root_element().text().collect::<String>());
    let first_profession_cell = document
        .select(&profession_cell_sel)
        .next()
        .map(|cell| classifier::normalize(&element_text(cell)))
        .unwrap_or_default();
    let empty_result_table = rows.len() >= 2
        && !has_cedula
        && !has_name
        && first_profession_cell.contains("NO HAY SOLICITUDES DISPONIBLES EN LA TABLA");

    let no_result = page_text.contains("NO SE ENCONTRARON RESULTADOS")
        || page_text.contains("NO ENCONTRADO")
        || page_text.contains("SIN RESULTADOS")
        || empty_result_table;

    if no_result {
        ResultState::NoResult
    } else {
        ResultState::Pending
    }
}

/// Extract the personal-data rows and the professions table from a
/// completed result page.
fn parse_profile(html: &str) -> (HashMap<String, String>, Vec<ProfessionRecord>) {
    let document = Html::parse_document(html);
    let user_row_sel = Selector::parse("#tableUser table tbody tr").expect("valid selector");
    let th_sel = Selector::parse("th").expect("valid selector");
    let profession_row_sel = Selector::parse("#profesional tbody tr").expect("valid selector");
    let td_sel = Selector::parse("td").expect("valid selector");
    let button_sel = Selector::parse("button").expect("valid selector");

    let mut basic_fields = HashMap::new();
    for row in document.select(&user_row_sel) {
        let Some(th) = row.select(&th_sel).next() else {
            continue;
        };
        let key = element_text(th).trim_end_matches(':').trim().to_string();
        let value = row_value(row);
        if !key.is_empty() {
            basic_fields.insert(key, value);
        }
    }

    let mut professions = Vec::new();
    for row in document.select(&profession_row_sel) {
        let cells: Vec<_> = row.select(&td_sel).collect();
        if cells.len() < 5 {
            continue;
        }
        let profession = element_text(cells[0]);
        let license = element_text(cells[1]);
        if profession.is_empty() || license.is_empty() {
            continue;
        }
        professions.push(ProfessionRecord {
            profession,
            license,
            registered_at: element_text(cells[2]),
            tome: element_text(cells[3]),
            folio: element_text(cells[4]),
            has_postgraduate: cells.len() > 5 && cells[5].select(&button_sel).next().is_some(),
        });
    }

    // Fallback for page revisions that render the professions into a
    // generic results table.
    if professions.is_empty() {
        let fallback_sel =
            Selector::parse("#divTabla table tbody tr, .dataTables_scrollBody table tbody tr")
                .expect("valid selector");
        for row in document.select(&fallback_sel) {
            let cells: Vec<_> = row.select(&td_sel).collect();
            if cells.len() < 2 {
                continue;
            }
            let profession = element_text(cells[0]);
            let license = element_text(cells[1]);
            if profession.is_empty() || license.is_empty() {
                continue;
            }
            if professions
                .iter()
                .any(|p: &ProfessionRecord| p.profession == profession && p.license == license)
            {
                continue;
            }
            professions.push(ProfessionRecord {
                profession,
                license,
                registered_at: cells.get(2).map(|c| element_text(*c)).unwrap_or_default(),
                tome: cells.get(3).map(|c| element_text(*c)).unwrap_or_default(),
                folio: cells.get(4).map(|c| element_text(*c)).unwrap_or_default(),
                has_postgraduate: cells
                    .get(5)
                    .is_some_and(|c| c.select(&button_sel).next().is_some()),
            });
        }
    }

    (basic_fields, professions)
}

/// Extract postgraduate rows, if the postgraduate panel is present and
/// visible.
fn parse_postgraduates(html: &str) -> Vec<PostgraduateRecord> {
    let document = Html::parse_document(html);
    let panel_sel = Selector::parse("#divTablaProfesiones").expect("valid selector");
    let row_sel = Selector::parse("#grd_prof tbody tr").expect("valid selector");
    let td_sel = Selector::parse("td").expect("valid selector");

    let Some(panel) = document.select(&panel_sel).next() else {
        return Vec::new();
    };
    let hidden = panel
        .value()
        .attr("style")
        .map(|style| style.replace(' ', "").contains("display:none"))
        .unwrap_or(false);
    if hidden {
        return Vec::new();
    }

    let mut postgraduates = Vec::new();
    for row in panel.select(&row_sel) {
        let cells: Vec<_> = row.select(&td_sel).collect();
        let degree = cells.first().map(|c| element_text(*c)).unwrap_or_default();
        if degree.is_empty() {
            continue;
        }
        postgraduates.push(PostgraduateRecord {
            degree,
            registered_at: cells.get(1).map(|c| element_text(*c)).unwrap_or_default(),
            tome: cells.get(2).map(|c| element_text(*c)).unwrap_or_default(),
            folio: cells.get(3).map(|c| element_text(*c)).unwrap_or_default(),
        });
    }
    postgraduates
}
