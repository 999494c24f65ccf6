//! Telegram HTML message rendering.
//!
//! Everything that reaches a subscriber is built here. User-controlled
//! text (titles, publishers, expressions) always goes through
//! [`escape_html`]; the markup itself is limited to the tags the Bot API
//! accepts (`b`, `i`, `a`, `code`).

use chrono::{DateTime, Datelike, FixedOffset, Utc};

use newsbell_core::alert::Scenario;
use newsbell_core::conversation::Reply;
use newsbell_core::ledger::Batch;
use newsbell_core::models::{IndexSnapshot, Item};
use newsbell_core::quiet::format_hhmm;

const HEAVY_RULE: &str = "━━━━━━━━━━━━━━━━━━━━";
const LIGHT_RULE: &str = "────────────────────";
const WEEKDAYS: [&str; 7] = ["월", "화", "수", "목", "금", "토", "일"];

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Recency marker: 🔥 under 15 minutes, 🆕 under an hour.
///
/// Older items were indexed late by the search provider and are flagged
/// as just discovered.
pub fn time_badge(published_at: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let minutes = (now - published_at).num_minutes();
    if minutes < 15 {
        " 🔥"
    } else if minutes < 60 {
        " 🆕"
    } else {
        " (방금 발견)"
    }
}

/// `10.18(토) 10:40` in the given offset.
pub fn local_stamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = at.with_timezone(&offset);
    format!(
        "{}.{}({}) {}",
        local.month(),
        local.day(),
        WEEKDAYS[local.weekday().num_days_from_monday() as usize],
        local.format("%H:%M")
    )
}

fn push_item(out: &mut String, item: &Item, now: DateTime<Utc>, offset: FixedOffset) {
    let multiplicity = if item.cluster_size > 1 {
        format!(" (유사 기사 {}건)", item.cluster_size - 1)
    } else {
        String::new()
    };
    out.push_str(&format!(
        "<a href='{}'><b>🔹 {}</b></a>{}\n\n",
        escape_html(&item.id),
        escape_html(&item.title),
        multiplicity
    ));
    out.push_str(&format!(
        "<code>{}, {}{}</code>\n",
        escape_html(&item.publisher),
        local_stamp(item.published_at, offset),
        time_badge(item.published_at, now)
    ));
    out.push_str(LIGHT_RULE);
    out.push_str("\n\n");
}

/// One message for one expression: fresh items first, then backfill.
pub fn news_batch(
    expression: &str,
    batch: &Batch,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let mut out = String::new();
    if !batch.fresh.is_empty() {
        out.push_str(&format!(
            "📰 <b>새로운 뉴스</b> (키워드: {})\n총 {}개\n{}\n\n",
            escape_html(expression),
            batch.fresh.len(),
            HEAVY_RULE
        ));
        for item in &batch.fresh {
            push_item(&mut out, item, now, offset);
        }
    }
    if !batch.backfill.is_empty() {
        out.push_str(&format!(
            "📰 <b>최신 뉴스</b> (키워드: {})\n💡 <i>이미 확인한 뉴스입니다</i>\n총 {}개\n{}\n\n",
            escape_html(expression),
            batch.backfill.len(),
            HEAVY_RULE
        ));
        for item in &batch.backfill {
            push_item(&mut out, item, now, offset);
        }
    }
    out.trim_end().to_string()
}

pub fn no_results(expression: &str) -> String {
    format!(
        "⚠️ 키워드 '<b>{}</b>'에 대한 뉴스를 찾을 수 없습니다.",
        escape_html(expression)
    )
}

pub fn no_subscriptions() -> String {
    "⚠️ <b>등록된 키워드가 없습니다.</b>\n\n/add 명령으로 키워드를 추가하세요.".to_string()
}

/// `1234567.891` → `1,234,567.89`.
pub fn money(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}

/// Current price of the leveraged companion, when it could be fetched.
pub struct Leveraged<'a> {
    pub symbol: &'a str,
    pub current: f64,
    pub scenarios: &'a [Scenario],
}

fn push_leveraged(out: &mut String, leveraged: &Leveraged<'_>, header: &str) {
    let symbol = escape_html(leveraged.symbol);
    out.push_str(&format!(
        "\n<b>{}</b>\n• 현재가: ${:.2}\n\n<b>{}</b>\n",
        symbol, leveraged.current, header
    ));
    for s in leveraged.scenarios {
        out.push_str(&format!(
            "• 전고점 대비 {}% 하락 시: ${:.2}\n",
            s.drawdown_pct, s.price
        ));
    }
}

/// Threshold alert for a newly reached drawdown level.
pub fn drop_alert(level: u32, snapshot: &IndexSnapshot, leveraged: Option<&Leveraged<'_>>) -> String {
    let mut out = format!(
        "🚨 <b>{} 하락 알림</b> 🚨\n\n<b>⚠️ 전고점 대비 {}% 하락!</b>\n\n<b>{}</b>\n• 현재가: ${}\n• 전고점: ${} ({})\n• 하락률: ▼ {:.2}%\n",
        escape_html(&snapshot.symbol),
        level,
        escape_html(&snapshot.symbol),
        money(snapshot.current),
        money(snapshot.peak),
        escape_html(&snapshot.peak_date),
        snapshot.drop_pct
    );
    if let Some(lev) = leveraged {
        push_leveraged(&mut out, lev, "📉 추가 하락 시 예상가");
    }
    out.trim_end().to_string()
}

/// On-demand index report.
pub fn index_report(
    snapshot: &IndexSnapshot,
    leveraged: Option<&Leveraged<'_>>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let mut out = format!(
        "📊 <b>주가 리포트</b> ({})\n\n<b>{}</b>\n• 현재가: ${}\n• 전고점: ${} ({})\n• 전고점 대비: {:.2}% (▼ {:.2}%)\n",
        now.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
        escape_html(&snapshot.symbol),
        money(snapshot.current),
        money(snapshot.peak),
        escape_html(&snapshot.peak_date),
        snapshot.percent_of_peak,
        snapshot.drop_pct
    );
    if let Some(lev) = leveraged {
        push_leveraged(&mut out, lev, "📉 하락 시나리오별 예상가");
    }
    out.trim_end().to_string()
}

pub fn help(interval_minutes: u64) -> String {
    format!(
        "🤖 <b>newsbell</b>\n\n\
         📌 <b>자동 알림</b>\n\
         • 뉴스: {}분마다 키워드 뉴스를 확인해 새 뉴스만 전송\n\
         • 주가: 전고점 대비 5%부터 1%p 단위로 하락 시 알림\n\n\
         💡 <b>명령어</b>\n\
         /add [키워드]: 키워드 추가 (AND, OR, 괄호 사용 가능)\n\
         /remove [키워드]: 키워드 제거\n\
         /list: 키워드 목록\n\
         /clear: 모든 키워드 제거\n\
         /quiet [시작 종료]: 방해금지 시간 설정 (off, on)\n\
         /check: 즉시 뉴스 확인\n\
         /cancel: 입력 취소",
        interval_minutes
    )
}

/// Text for a conversation reply.
pub fn reply(reply: &Reply, interval_minutes: u64) -> String {
    match reply {
        Reply::Help => help(interval_minutes),
        Reply::Added(expr) => format!("✅ 키워드 '{}' 추가되었습니다!", escape_html(expr)),
        Reply::AlreadyRegistered(expr) => {
            format!("⚠️ 키워드 '{}' 이미 등록되어 있습니다.", escape_html(expr))
        }
        Reply::InvalidExpression(reason) => {
            format!("❌ 잘못된 키워드 식입니다: {}", escape_html(reason))
        }
        Reply::Removed(expr) => format!("✅ 키워드 '{}'가 제거되었습니다.", escape_html(expr)),
        Reply::NotRegistered(expr) => {
            format!("❌ 키워드 '{}'를 찾을 수 없습니다.", escape_html(expr))
        }
        Reply::Cleared(0) => "📝 제거할 키워드가 없습니다.".to_string(),
        Reply::Cleared(n) => format!("✅ 모든 키워드가 제거되었습니다. (총 {}개)", n),
        Reply::List(exprs) if exprs.is_empty() => {
            "📝 등록된 키워드가 없습니다.\n/add 명령으로 키워드를 추가하세요.".to_string()
        }
        Reply::List(exprs) => {
            let lines: Vec<String> = exprs
                .iter()
                .enumerate()
                .map(|(i, e)| format!("{}. {}", i + 1, escape_html(e)))
                .collect();
            format!("📝 <b>등록된 키워드 목록:</b>\n\n{}", lines.join("\n"))
        }
        Reply::PromptExpression => "📝 <b>키워드 추가</b>\n\n추가할 키워드를 입력하세요.".to_string(),
        Reply::PromptQuietStart => {
            "🔕 <b>방해금지 시작 시간</b>\n\nHH:MM 형식으로 입력하세요. (예: 23:00)".to_string()
        }
        Reply::PromptQuietEnd { start } => format!(
            "🔕 <b>방해금지 종료 시간</b>\n\n시작: {}\nHH:MM 형식으로 입력하세요. (예: 07:00)",
            format_hhmm(*start)
        ),
        Reply::InvalidTime(text) => format!(
            "❌ '{}'은(는) 올바른 시간이 아닙니다. HH:MM 형식으로 입력하세요.",
            escape_html(text)
        ),
        Reply::QuietSet(window) => format!(
            "✅ 방해금지 시간이 설정되었습니다!\n\n🔕 {}",
            window.describe()
        ),
        Reply::QuietDisabled => "🔔 방해금지가 해제되었습니다.".to_string(),
        Reply::QuietEnabled(window) => format!("🔕 방해금지가 켜졌습니다. ({})", window.describe()),
        Reply::NoQuietWindow => "⚠️ 설정된 방해금지 시간이 없습니다.".to_string(),
        Reply::CheckRequested => "🔍 뉴스를 확인하고 있습니다...".to_string(),
        Reply::Cancelled => "취소되었습니다.".to_string(),
        Reply::Unknown(text) => format!(
            "❓ 알 수 없는 입력입니다: {}\n/help 로 명령어를 확인하세요.",
            escape_html(text)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn item(title: &str, minutes_ago: i64, now: DateTime<Utc>) -> Item {
        Item::new(
            "https://n.news.naver.com/a?x=1&y=2",
            title,
            "연합뉴스",
            now - Duration::minutes(minutes_ago),
        )
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>A&B</b> 'q'"), "&lt;b&gt;A&amp;B&lt;/b&gt; &#39;q&#39;");
    }

    #[test]
    fn test_time_badge() {
        let now = Utc.with_ymd_and_hms(2025, 10, 18, 3, 0, 0).unwrap();
        assert_eq!(time_badge(now - Duration::minutes(5), now), " 🔥");
        assert_eq!(time_badge(now - Duration::minutes(30), now), " 🆕");
        assert_eq!(time_badge(now - Duration::hours(3), now), " (방금 발견)");
    }

    #[test]
    fn test_local_stamp() {
        // 01:40 UTC on a Saturday is 10:40 KST the same day.
        let at = Utc.with_ymd_and_hms(2025, 10, 18, 1, 40, 0).unwrap();
        assert_eq!(local_stamp(at, kst()), "10.18(토) 10:40");
    }

    #[test]
    fn test_news_batch_sections_and_escaping() {
        let now = Utc.with_ymd_and_hms(2025, 10, 18, 3, 0, 0).unwrap();
        let batch = Batch {
            fresh: vec![item("A <B> & C", 5, now).with_cluster_size(3)],
            backfill: vec![item("old", 120, now)],
        };
        let text = news_batch("A AND B", &batch, now, kst());
        assert!(text.starts_with("📰 <b>새로운 뉴스</b> (키워드: A AND B)\n총 1개"));
        assert!(text.contains("A &lt;B&gt; &amp; C"));
        assert!(text.contains("(유사 기사 2건)"));
        assert!(text.contains("href='https://n.news.naver.com/a?x=1&amp;y=2'"));
        assert!(text.contains("이미 확인한 뉴스입니다"));
        let fresh_at = text.find("새로운 뉴스").unwrap();
        let backfill_at = text.find("최신 뉴스").unwrap();
        assert!(fresh_at < backfill_at);
    }

    #[test]
    fn test_money() {
        assert_eq!(money(21345.678), "21,345.68");
        assert_eq!(money(999.0), "999.00");
        assert_eq!(money(1234567.0), "1,234,567.00");
    }

    #[test]
    fn test_drop_alert() {
        let snapshot = IndexSnapshot {
            symbol: "^NDX".into(),
            current: 19000.0,
            peak: 20000.0,
            peak_date: "2025-02-19".into(),
            percent_of_peak: 95.0,
            drop_pct: 5.0,
        };
        let scenarios = newsbell_core::alert::leveraged_scenarios(19000.0, 20000.0, 80.0);
        let lev = Leveraged {
            symbol: "TQQQ",
            current: 80.0,
            scenarios: &scenarios,
        };
        let text = drop_alert(5, &snapshot, Some(&lev));
        assert!(text.starts_with("🚨 <b>^NDX 하락 알림</b>"));
        assert!(text.contains("전고점 대비 5% 하락!"));
        assert!(text.contains("• 현재가: $19,000.00"));
        assert!(text.contains("• 전고점: $20,000.00 (2025-02-19)"));
        assert!(text.contains("<b>TQQQ</b>"));
        assert!(text.contains("• 전고점 대비 20% 하락 시:"));

        let without = drop_alert(5, &snapshot, None);
        assert!(!without.contains("TQQQ"));
    }

    #[test]
    fn test_reply_rendering() {
        assert!(reply(&Reply::Help, 10).contains("10분마다"));
        assert_eq!(reply(&Reply::Cleared(0), 10), "📝 제거할 키워드가 없습니다.");
        assert!(reply(&Reply::List(vec!["a".into(), "b<c".into()]), 10).contains("2. b&lt;c"));
    }
}
