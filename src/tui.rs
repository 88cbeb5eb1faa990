use anyhow::Result;
use crossterm::{
    event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Sparkline, Tabs, Wrap},
};
use std::io::stdout;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::info;

use crate::directory;
use crate::error::AuditError;
use crate::models::{percent, trend_label, AuditOutcome, AuditRequest, CompanyProfile, RiskTier};
use crate::view::{self, AppState, Controller, NavTarget, View};

const TICK: Duration = Duration::from_millis(200);

type AuditReply = (u64, Result<AuditOutcome, AuditError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Title,
    Company,
    Requirements,
    Location,
    EmploymentType,
    Industry,
    Submit,
}

impl FormField {
    const ORDER: [FormField; 7] = [
        FormField::Title,
        FormField::Company,
        FormField::Requirements,
        FormField::Location,
        FormField::EmploymentType,
        FormField::Industry,
        FormField::Submit,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }

    fn text_mut(self, form: &mut AuditRequest) -> Option<&mut String> {
        match self {
            FormField::Title => Some(&mut form.title),
            FormField::Company => Some(&mut form.company),
            FormField::Requirements => Some(&mut form.requirements),
            FormField::Location => Some(&mut form.location),
            _ => None,
        }
    }
}

/// Widget-level state that the controller doesn't need to know about.
struct UiState {
    focus: FormField,
    search: String,
    searching: bool,
    directory: ListState,
}

impl UiState {
    fn new() -> Self {
        let mut directory = ListState::default();
        directory.select(Some(0));
        Self {
            focus: FormField::Title,
            search: String::new(),
            searching: false,
            directory,
        }
    }

    fn companies(&self) -> Vec<CompanyProfile> {
        directory::search(&self.search)
    }
}

enum Flow {
    Continue,
    Quit,
}

pub fn run_dashboard(controller: &mut Controller) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, controller);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    controller: &mut Controller,
) -> Result<()> {
    let mut ui = UiState::new();
    let (reply_tx, reply_rx) = mpsc::channel::<AuditReply>();

    loop {
        while let Ok((id, result)) = reply_rx.try_recv() {
            controller.complete(id, result);
        }
        controller.pump();

        terminal.draw(|frame| draw(frame, controller.state(), &mut ui))?;

        if !event::poll(TICK)? {
            continue;
        }
        if let TermEvent::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Flow::Quit = handle_key(key, controller, &mut ui, &reply_tx) {
                break;
            }
        }
    }
    Ok(())
}

fn handle_key(
    key: KeyEvent,
    controller: &mut Controller,
    ui: &mut UiState,
    reply_tx: &mpsc::Sender<AuditReply>,
) -> Flow {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => return Flow::Quit,
            KeyCode::Char('s') => {
                start_audit(controller, reply_tx);
                return Flow::Continue;
            }
            _ => return Flow::Continue,
        }
    }

    match key.code {
        KeyCode::F(1) => return navigate(controller, ui, NavTarget::Home),
        KeyCode::F(2) => return navigate(controller, ui, NavTarget::Audit),
        KeyCode::F(3) => return navigate(controller, ui, NavTarget::Directory),
        KeyCode::F(4) => return navigate(controller, ui, NavTarget::History),
        _ => {}
    }

    let view = controller.state().view;
    let typing = view == View::AuditInput || (view == View::Directory && ui.searching);
    if !typing {
        match key.code {
            KeyCode::Char('q') => return Flow::Quit,
            KeyCode::Char('1') => return navigate(controller, ui, NavTarget::Home),
            KeyCode::Char('2') => return navigate(controller, ui, NavTarget::Audit),
            KeyCode::Char('3') => return navigate(controller, ui, NavTarget::Directory),
            KeyCode::Char('4') => return navigate(controller, ui, NavTarget::History),
            _ => {}
        }
    }

    match view {
        View::Home => {
            if key.code == KeyCode::Enter {
                return navigate(controller, ui, NavTarget::Audit);
            }
        }
        View::AuditInput => handle_form_key(key, controller, ui, reply_tx),
        View::AuditResult => {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char('n')) {
                controller.dismiss_result();
                ui.focus = FormField::Title;
            }
        }
        View::Directory => handle_directory_key(key, ui),
        View::History => {}
    }
    Flow::Continue
}

fn navigate(controller: &mut Controller, ui: &mut UiState, target: NavTarget) -> Flow {
    controller.navigate(target);
    ui.searching = false;
    Flow::Continue
}

fn start_audit(controller: &mut Controller, reply_tx: &mpsc::Sender<AuditReply>) {
    let Some(pending) = controller.submit() else {
        return;
    };
    let provider = controller.provider();
    let tx = reply_tx.clone();
    info!(id = pending.id, "Starting audit worker");
    thread::spawn(move || {
        let result = view::execute(provider.as_ref(), &pending);
        let _ = tx.send((pending.id, result));
    });
}

fn handle_form_key(
    key: KeyEvent,
    controller: &mut Controller,
    ui: &mut UiState,
    reply_tx: &mpsc::Sender<AuditReply>,
) {
    let mut form = controller.state().form.clone();
    let mut edited = false;

    match key.code {
        KeyCode::Esc => {
            if controller.state().is_submitting() {
                controller.cancel();
            } else {
                controller.dismiss_error();
            }
        }
        KeyCode::Tab | KeyCode::Down => ui.focus = ui.focus.next(),
        KeyCode::BackTab | KeyCode::Up => ui.focus = ui.focus.prev(),
        KeyCode::Enter => match ui.focus {
            FormField::Submit => start_audit(controller, reply_tx),
            FormField::Requirements => {
                form.requirements.push('\n');
                edited = true;
            }
            FormField::EmploymentType => {
                form.employment_type = form.employment_type.cycle();
                edited = true;
            }
            FormField::Industry => {
                form.industry = form.industry.cycle();
                edited = true;
            }
            _ => ui.focus = ui.focus.next(),
        },
        KeyCode::Right | KeyCode::Char(' ')
            if matches!(ui.focus, FormField::EmploymentType | FormField::Industry) =>
        {
            if ui.focus == FormField::EmploymentType {
                form.employment_type = form.employment_type.cycle();
            } else {
                form.industry = form.industry.cycle();
            }
            edited = true;
        }
        KeyCode::Backspace => {
            if let Some(text) = ui.focus.text_mut(&mut form) {
                text.pop();
                edited = true;
            }
        }
        KeyCode::Char(c) => {
            if let Some(text) = ui.focus.text_mut(&mut form) {
                text.push(c);
                edited = true;
            }
        }
        _ => {}
    }

    if edited {
        controller.edit_form(form);
    }
}

fn handle_directory_key(key: KeyEvent, ui: &mut UiState) {
    if ui.searching {
        match key.code {
            KeyCode::Enter | KeyCode::Esc => ui.searching = false,
            KeyCode::Backspace => {
                ui.search.pop();
            }
            KeyCode::Char(c) => ui.search.push(c),
            _ => {}
        }
        ui.directory.select(Some(0));
        return;
    }

    let count = ui.companies().len();
    let selected = ui.directory.selected().unwrap_or(0);
    match key.code {
        KeyCode::Char('/') => ui.searching = true,
        KeyCode::Down | KeyCode::Char('j') if selected + 1 < count => {
            ui.directory.select(Some(selected + 1))
        }
        KeyCode::Up | KeyCode::Char('k') if selected > 0 => ui.directory.select(Some(selected - 1)),
        _ => {}
    }
}

// --- Drawing ---

fn tier_color(tier: RiskTier) -> Color {
    match tier {
        RiskTier::Low => Color::Green,
        RiskTier::Moderate => Color::Yellow,
        RiskTier::High => Color::Red,
    }
}

fn bar(value: f64, width: usize) -> String {
    let filled = (value.clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

fn draw(frame: &mut Frame, state: &AppState, ui: &mut UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let selected = match state.view {
        View::Home => 0,
        View::AuditInput | View::AuditResult => 1,
        View::Directory => 2,
        View::History => 3,
    };
    let tabs = Tabs::new(vec!["Dashboard", "Audit Post", "Company Index", "History"])
        .block(Block::default().borders(Borders::ALL).title(" GhostBuster "))
        .select(selected)
        .highlight_style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD));
    frame.render_widget(tabs, chunks[0]);

    match state.view {
        View::Home => draw_home(frame, chunks[1]),
        View::AuditInput => draw_form(frame, chunks[1], state, ui),
        View::AuditResult => draw_result(frame, chunks[1], state),
        View::Directory => draw_directory(frame, chunks[1], ui),
        View::History => draw_history(frame, chunks[1], state),
    }

    let help = match state.view {
        View::AuditInput if state.is_submitting() => " Analyzing... Esc:cancel  F1-F4:navigate",
        View::AuditInput => " Tab/Shift-Tab:field  Enter/Ctrl-S:submit  Esc:dismiss error  F1-F4:navigate  Ctrl-C:quit",
        View::AuditResult => " Enter:analyze another post  1-4:navigate  q:quit",
        View::Directory if ui.searching => " type to search  Enter/Esc:done",
        View::Directory => " j/k:select  /:search  1-4:navigate  q:quit",
        _ => " 1:dashboard 2:audit 3:companies 4:history  q:quit",
    };
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[2],
    );
}

fn draw_home(frame: &mut Frame, area: Rect) {
    let lines = vec![
        Line::from(Span::styled(
            "Stop Chasing Ghost Jobs.",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(
            "AI analysis of job market signals to check whether a listing is legitimate, stale, \
             or just for compliance.",
        ),
        Line::from(""),
        Line::from(Span::styled("Risk Scoring", Style::default().fg(Color::Red))),
        Line::from("  A 0-100% probability that a job is active or a \"ghost\"."),
        Line::from(Span::styled("Staleness Detection", Style::default().fg(Color::Yellow))),
        Line::from("  Spot jobs reposted for months without hiring."),
        Line::from(Span::styled("Market Intelligence", Style::default().fg(Color::Green))),
        Line::from("  See which companies are hiring versus collecting resumes."),
        Line::from(""),
        Line::from(Span::styled(
            "Press Enter to start a free audit",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];
    frame.render_widget(
        Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(" Dashboard "))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn draw_form(frame: &mut Frame, area: Rect, state: &AppState, ui: &UiState) {
    let form = &state.form;
    let mut lines: Vec<Line> = Vec::new();

    if let Some(error) = &state.validation_error {
        lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))));
        lines.push(Line::from(""));
    }
    if let Some(error) = &state.service_error {
        lines.push(Line::from(Span::styled(
            format!("{}  (Esc to dismiss)", error),
            Style::default().fg(Color::White).bg(Color::Red),
        )));
        lines.push(Line::from(""));
    }

    let label = |field: FormField, text: &str| {
        let style = if ui.focus == field {
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        Span::styled(format!("{:<14}", text), style)
    };
    let cursor = |field: FormField| if ui.focus == field { "_" } else { "" };

    lines.push(Line::from(vec![
        label(FormField::Title, "Job Title*"),
        Span::raw(format!("{}{}", form.title, cursor(FormField::Title))),
    ]));
    lines.push(Line::from(vec![
        label(FormField::Company, "Company"),
        Span::raw(format!("{}{}", form.company, cursor(FormField::Company))),
    ]));
    lines.push(Line::from(label(FormField::Requirements, "Requirements*")));
    let requirements = format!("{}{}", form.requirements, cursor(FormField::Requirements));
    for line in requirements.lines() {
        lines.push(Line::from(format!("  {}", line)));
    }
    if requirements.is_empty() {
        lines.push(Line::from(Span::styled(
            "  Paste the full job description here...",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::from(vec![
        label(FormField::Location, "Location"),
        Span::raw(format!("{}{}", form.location, cursor(FormField::Location))),
    ]));
    lines.push(Line::from(vec![
        label(FormField::EmploymentType, "Type"),
        Span::raw(format!("< {} >", form.employment_type)),
    ]));
    lines.push(Line::from(vec![
        label(FormField::Industry, "Industry"),
        Span::raw(format!("< {} >", form.industry)),
    ]));
    lines.push(Line::from(""));

    let submit = if state.is_submitting() {
        Span::styled("[ Analyzing... ]", Style::default().fg(Color::DarkGray))
    } else if ui.focus == FormField::Submit {
        Span::styled(
            "[ Run Ghost Audit ]",
            Style::default().fg(Color::Black).bg(Color::Magenta),
        )
    } else {
        Span::styled("[ Run Ghost Audit ]", Style::default().fg(Color::Magenta))
    };
    lines.push(Line::from(submit));

    frame.render_widget(
        Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(" New Job Audit "))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn draw_result(frame: &mut Frame, area: Rect, state: &AppState) {
    let Some(displayed) = &state.current else {
        return;
    };
    let result = &displayed.outcome.result;
    let tier = RiskTier::from_score(result.score);
    let color = tier_color(tier);

    let mut lines: Vec<Line> = vec![
        Line::from(Span::styled(
            "Ghost Job Risk Assessment",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(posting_label(&displayed.request)),
        Line::from(""),
        Line::from(vec![
            Span::styled(
                percent(result.score),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(tier.verdict().to_uppercase(), Style::default().fg(color)),
        ]),
    ];
    if displayed.outcome.fallback_applied {
        lines.push(Line::from(Span::styled(
            "The AI returned no usable score; showing the default 50%.",
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::from(""));
    for line in textwrap::fill(&result.analysis, 76).lines() {
        lines.push(Line::from(line.to_string()));
    }
    lines.push(Line::from(""));

    let factor_color = if tier == RiskTier::High { Color::Red } else { Color::Blue };
    for factor in &result.factors {
        lines.push(Line::from(vec![
            Span::styled(bar(factor.impact, 10), Style::default().fg(factor_color)),
            Span::raw(format!(" {:>4}  ", percent(factor.impact))),
            Span::styled(factor.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
        ]));
        if !factor.reason.is_empty() {
            for line in textwrap::fill(&factor.reason, 68).lines() {
                lines.push(Line::from(Span::styled(
                    format!("                  {}", line),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
    }

    frame.render_widget(
        Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color))
                    .title(" Result "),
            )
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn posting_label(request: &AuditRequest) -> String {
    if request.company.is_empty() {
        request.title.clone()
    } else {
        format!("{} at {}", request.title, request.company)
    }
}

fn draw_directory(frame: &mut Frame, area: Rect, ui: &mut UiState) {
    let companies = ui.companies();
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let items: Vec<ListItem> = companies
        .iter()
        .map(|company| {
            let tier = RiskTier::from_score(company.ghost_risk);
            ListItem::new(Line::from(vec![
                Span::raw(format!("[{}] {:<12} ", directory::initials(company.name), company.name)),
                Span::styled(percent(company.ghost_risk), Style::default().fg(tier_color(tier))),
            ]))
        })
        .collect();

    let title = if ui.search.is_empty() && !ui.searching {
        format!(" Companies ({}) ", companies.len())
    } else {
        format!(" Search: {}{} ", ui.search, if ui.searching { "_" } else { "" })
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, chunks[0], &mut ui.directory);

    let Some(company) = ui.directory.selected().and_then(|i| companies.get(i)) else {
        frame.render_widget(
            Paragraph::new("No companies match.")
                .block(Block::default().borders(Borders::ALL).title(" Detail ")),
            chunks[1],
        );
        return;
    };

    let detail_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(5)])
        .split(chunks[1]);

    frame.render_widget(
        Paragraph::new(company_detail(company))
            .block(Block::default().borders(Borders::ALL).title(" Detail "))
            .wrap(Wrap { trim: false }),
        detail_chunks[0],
    );

    let trend_color = if company.metrics.trend >= 0.0 { Color::Green } else { Color::Red };
    let sparkline = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Posting volume {} ",
            trend_label(company.metrics.trend)
        )))
        .data(company.metrics.sparkline.as_slice())
        .style(Style::default().fg(trend_color));
    frame.render_widget(sparkline, detail_chunks[1]);
}

fn company_detail(company: &CompanyProfile) -> Text<'static> {
    let tier = RiskTier::from_score(company.ghost_risk);
    let metrics = &company.metrics;
    let mut lines = vec![
        Line::from(Span::styled(company.name, Style::default().add_modifier(Modifier::BOLD))),
        Line::from(format!("{}  |  {} employees  |  {}", company.location, company.employees, company.website)),
        Line::from(""),
        Line::from(vec![
            Span::raw("Ghost Score: "),
            Span::styled(
                format!("{} {}", percent(company.ghost_risk), tier.label()),
                Style::default().fg(tier_color(tier)).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(format!("Active jobs:      {}", metrics.jobs_count)),
        Line::from(format!("Remote:           {}%", metrics.remote_percent)),
        Line::from(format!("Avg posting age:  {} days", metrics.avg_age_days)),
        Line::from(format!("Salary range:     {} - {}", metrics.salary_min, metrics.salary_max)),
        Line::from(""),
        Line::from(Span::styled("Sources", Style::default().add_modifier(Modifier::BOLD))),
    ];
    for source in &metrics.sources {
        lines.push(Line::from(format!(
            "  {:<14} {} {}%",
            source.name,
            bar(f64::from(source.value) / 100.0, 20),
            source.value
        )));
    }
    Text::from(lines)
}

fn draw_history(frame: &mut Frame, area: Rect, state: &AppState) {
    let title = if state.local_only {
        " Your Audit History (local-only: not saved) "
    } else {
        " Your Audit History "
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    if state.history.is_empty() {
        frame.render_widget(
            Paragraph::new("No audits found. Start by auditing a job post.")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            area,
        );
        return;
    }

    let items: Vec<ListItem> = state
        .history
        .iter()
        .map(|entry| {
            let tier = RiskTier::from_score(entry.score);
            ListItem::new(vec![
                Line::from(vec![
                    Span::styled(
                        format!("{:>4} Risk  ", percent(entry.score)),
                        Style::default().fg(tier_color(tier)).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(entry.job_title.clone(), Style::default().add_modifier(Modifier::BOLD)),
                ]),
                Line::from(Span::styled(
                    format!("           {}  {}", entry.company, entry.date_label()),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();
    frame.render_widget(List::new(items).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_focus_wraps() {
        assert_eq!(FormField::Submit.next(), FormField::Title);
        assert_eq!(FormField::Title.prev(), FormField::Submit);
        assert_eq!(FormField::Company.next(), FormField::Requirements);
    }

    #[test]
    fn test_only_text_fields_accept_typing() {
        let mut form = AuditRequest::default();
        FormField::Location.text_mut(&mut form).unwrap().push_str("Remote");
        assert_eq!(form.location, "Remote");
        assert!(FormField::Industry.text_mut(&mut form).is_none());
        assert!(FormField::Submit.text_mut(&mut form).is_none());
    }

    #[test]
    fn test_posting_label_omits_missing_company() {
        let mut request = AuditRequest {
            title: "Backend Engineer".to_string(),
            ..AuditRequest::default()
        };
        assert_eq!(posting_label(&request), "Backend Engineer");
        request.company = "Acme".to_string();
        assert_eq!(posting_label(&request), "Backend Engineer at Acme");
    }

    #[test]
    fn test_bar_width_is_fixed() {
        assert_eq!(bar(0.0, 10), "░░░░░░░░░░");
        assert_eq!(bar(0.5, 10), "█████░░░░░");
        assert_eq!(bar(3.0, 4), "████");
        assert_eq!(bar(0.33, 10).chars().count(), 10);
    }
}
