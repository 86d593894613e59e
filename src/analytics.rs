// src/analytics.rs

use std::collections::BTreeMap;

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{error, info};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::complaint::{caller_scope, find_in_scope, Scope};
use crate::error::ApiError;
use crate::models::{Complaint, ComplaintStatus, Role};

const UNKNOWN_STATUS: &str = "unknown";
const RECENT_UPDATES: usize = 20;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ComplaintSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Completed complaints per `created_at` day.
    pub resolved_by_date: BTreeMap<String, usize>,
    pub new_today: usize,
    pub resolved_last_24h: usize,
    pub avg_response_hours: Option<f64>,
    pub efficiency_percent: u32,
}

/// Aggregates complaints the way the dashboards chart them.
pub fn summarize(complaints: &[Complaint], now: DateTime<Utc>) -> ComplaintSummary {
    let mut by_status: BTreeMap<String, usize> = ComplaintStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    by_status.insert(UNKNOWN_STATUS.to_string(), 0);

    let mut by_category = BTreeMap::new();
    let mut resolved_by_date = BTreeMap::new();
    let mut new_today = 0;
    let mut resolved_last_24h = 0;
    let mut completed = 0usize;
    let mut response_hours = 0.0;
    let today = now.date_naive();

    for c in complaints {
        let status = c.status_kind();
        let key = status.map(|s| s.as_str()).unwrap_or(UNKNOWN_STATUS);
        *by_status.entry(key.to_string()).or_insert(0) += 1;

        let category = match c.category.trim() {
            "" => "uncategorized".to_string(),
            other => other.to_string(),
        };
        *by_category.entry(category).or_insert(0) += 1;

        if c.created_at.date_naive() == today {
            new_today += 1;
        }

        if status == Some(ComplaintStatus::Completed) {
            completed += 1;
            let day = c.created_at.format("%Y-%m-%d").to_string();
            *resolved_by_date.entry(day).or_insert(0) += 1;
            if now - c.updated_at <= Duration::hours(24) {
                resolved_last_24h += 1;
            }
            response_hours += (c.updated_at - c.created_at).num_minutes() as f64 / 60.0;
        }
    }

    let avg_response_hours = if completed == 0 {
        None
    } else {
        Some((response_hours / completed as f64 * 10.0).round() / 10.0)
    };
    let efficiency_percent = if complaints.is_empty() {
        0
    } else {
        (completed as f64 / complaints.len() as f64 * 100.0).round() as u32
    };

    ComplaintSummary {
        total: complaints.len(),
        by_status,
        by_category,
        resolved_by_date,
        new_today,
        resolved_last_24h,
        avg_response_hours,
        efficiency_percent,
    }
}

/// Admins may narrow to a category; supervisors always see their own.
fn category_filter(scope: &Scope, query: &AnalyticsQuery) -> Document {
    match (scope, query.category.as_deref().map(str::trim)) {
        (Scope::All, Some(category)) if !category.is_empty() => {
            Scope::Category(category.to_string()).filter()
        }
        _ => doc! {},
    }
}

async fn scoped_complaints(
    req: &HttpRequest,
    data: &AppState,
    query: &AnalyticsQuery,
) -> Result<Vec<Complaint>, ApiError> {
    let caller = current_user(req)?;
    caller.require_role(&[Role::Admin, Role::Supervisor])?;
    let (_, scope) = caller_scope(data, &caller).await?;
    find_in_scope(data, &scope, category_filter(&scope, query)).await
}

/// GET /api/analytics/summary
pub async fn summary(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let complaints = scoped_complaints(&req, &data, &query).await?;
    Ok(HttpResponse::Ok().json(summarize(&complaints, Utc::now())))
}

pub fn to_csv(complaints: &[Complaint]) -> Result<Vec<u8>, ApiError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let write = |wtr: &mut csv::Writer<Vec<u8>>| -> csv::Result<()> {
        wtr.write_record([
            "id",
            "title",
            "status",
            "category",
            "building",
            "room",
            "submitted_by",
            "created_at",
        ])?;
        for c in complaints {
            let created = c.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            wtr.write_record([
                c.complaint_id.as_str(),
                c.title.as_str(),
                c.status.as_str(),
                c.category.as_str(),
                c.building.as_str(),
                c.room.as_str(),
                c.submitted_by.as_str(),
                created.as_str(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    };
    write(&mut wtr).map_err(|e| {
        error!("CSV export failed: {}", e);
        ApiError::Internal(e.to_string())
    })?;
    wtr.into_inner()
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET /api/analytics/export
pub async fn export(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let complaints = scoped_complaints(&req, &data, &query).await?;
    let body = to_csv(&complaints)?;
    info!("Exported {} complaint(s) as CSV", complaints.len());
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/csv; charset=utf-8"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"complaints.csv\"",
        ))
        .body(body))
}

#[derive(Debug, Serialize)]
pub struct SupervisorUpdate {
    pub complaint_id: String,
    pub title: String,
    pub category: String,
    pub status: String,
    pub last_updated_by: Option<String>,
    pub last_updated_by_role: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub fn recent_updates(mut complaints: Vec<Complaint>) -> Vec<SupervisorUpdate> {
    complaints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    complaints
        .into_iter()
        .take(RECENT_UPDATES)
        .map(|c| SupervisorUpdate {
            complaint_id: c.complaint_id,
            title: c.title,
            category: c.category,
            status: c.status,
            last_updated_by: c.last_updated_by,
            last_updated_by_role: c.last_updated_by_role,
            updated_at: c.updated_at,
        })
        .collect()
}

/// GET /api/analytics/supervisor-updates
pub async fn supervisor_updates(req: HttpRequest, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Admin])?;
    let updated = find_in_scope(
        &data,
        &Scope::All,
        doc! { "last_updated_by": { "$exists": true } },
    )
    .await?;
    Ok(HttpResponse::Ok().json(recent_updates(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complaint(id: &str, status: &str, category: &str, created: DateTime<Utc>, updated: DateTime<Utc>) -> Complaint {
        Complaint {
            complaint_id: id.into(),
            title: format!("Complaint {}", id),
            description: "desc".into(),
            building: "Block B".into(),
            room: "12".into(),
            category: category.into(),
            contact_number: None,
            preferred_date: None,
            preferred_time: None,
            status: status.into(),
            user_id: "u1".into(),
            user_email: "u1@gmail.com".into(),
            submitted_by: "student".into(),
            image_url: None,
            image_file_id: None,
            image_content_type: None,
            reopen_reason: None,
            reopened_at: None,
            last_updated_by: None,
            last_updated_by_role: None,
            created_at: created,
            updated_at: updated,
        }
    }

    #[test]
    fn empty_summary() {
        let s = summarize(&[], Utc::now());
        assert_eq!(s.total, 0);
        assert_eq!(s.efficiency_percent, 0);
        assert_eq!(s.avg_response_hours, None);
        assert_eq!(s.by_status.len(), 5);
        assert!(s.by_status.values().all(|n| *n == 0));
    }

    #[test]
    fn counts_statuses_with_legacy_spellings() {
        let now = Utc::now();
        let list = vec![
            complaint("1", "Pending", "Plumbing", now, now),
            complaint("2", "in-progress", "Plumbing", now, now),
            complaint("3", "Resolved", "Electrical", now, now),
            complaint("4", "on hold", "", now, now),
        ];
        let s = summarize(&list, now);
        assert_eq!(s.total, 4);
        assert_eq!(s.by_status["pending"], 1);
        assert_eq!(s.by_status["in progress"], 1);
        assert_eq!(s.by_status["completed"], 1);
        assert_eq!(s.by_status["unknown"], 1);
        assert_eq!(s.by_category["Plumbing"], 2);
        assert_eq!(s.by_category["uncategorized"], 1);
        assert_eq!(s.efficiency_percent, 25);
    }

    #[test]
    fn response_time_and_recent_resolution() {
        let now = Utc::now();
        let list = vec![
            complaint("1", "completed", "Plumbing", now - Duration::hours(10), now - Duration::hours(6)),
            complaint("2", "completed", "Plumbing", now - Duration::days(5), now - Duration::days(3)),
            complaint("3", "pending", "Plumbing", now - Duration::days(5), now - Duration::days(5)),
        ];
        let s = summarize(&list, now);
        assert_eq!(s.resolved_last_24h, 1);
        assert_eq!(s.avg_response_hours, Some(26.0));
        assert_eq!(s.efficiency_percent, 67);
        assert_eq!(s.resolved_by_date.values().sum::<usize>(), 2);
    }

    #[test]
    fn new_today_uses_calendar_day() {
        let now = "2026-10-19T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let list = vec![
            complaint("1", "pending", "x", now - Duration::hours(11), now),
            complaint("2", "pending", "x", now - Duration::hours(13), now),
        ];
        assert_eq!(summarize(&list, now).new_today, 1);
    }

    #[test]
    fn csv_has_header_and_quotes_fields() {
        let now = "2026-10-19T08:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut c = complaint("c1", "pending", "Plumbing", now, now);
        c.title = "Tap, leaking".into();
        let out = String::from_utf8(to_csv(&[c]).unwrap()).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("id,title,status,category,building,room,submitted_by,created_at")
        );
        assert_eq!(
            lines.next(),
            Some("c1,\"Tap, leaking\",pending,Plumbing,Block B,12,student,2026-10-19T08:30:00Z")
        );
    }

    #[test]
    fn admin_category_filter_only_applies_to_full_scope() {
        let q = AnalyticsQuery {
            category: Some("Electrical".into()),
        };
        assert!(category_filter(&Scope::All, &q).contains_key("category"));
        assert!(category_filter(&Scope::Category("Plumbing".into()), &q).is_empty());
        let blank = AnalyticsQuery {
            category: Some(" ".into()),
        };
        assert!(category_filter(&Scope::All, &blank).is_empty());
    }

    #[test]
    fn recent_updates_are_capped_and_newest_first() {
        let now = Utc::now();
        let list: Vec<Complaint> = (0..25)
            .map(|i| complaint(&i.to_string(), "pending", "x", now, now - Duration::minutes(i)))
            .collect();
        let recent = recent_updates(list);
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].complaint_id, "0");
        assert_eq!(recent[19].complaint_id, "19");
    }
}
