//! Read-only reports assembled from several collections.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::Document;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::{
    error::Error,
    mongo_ext::{fill_counts, Collection, GroupCount},
    util::{one_month_ago, parse_query_date, Populated},
};

use super::{
    auth::{UserAccess, UserCollection, UserRole},
    equipment::EquipmentCollection,
    member::{Attendance, Member, MemberCollection, MemberRelations},
    payment::{
        completed, completed_since, monthly_window_start, revenue, Payment, PaymentCollection,
        PaymentDeps,
    },
    workout::WorkoutCollection,
};

const RECENT_DAYS: i64 = 7;
const RECENT_LIMIT: i64 = 5;
const EXPIRING_DAYS: i64 = 30;
const ATTENDANCE_DAYS: usize = 30;

const MEMBERSHIP_TYPES: [&str; 4] = ["basic", "standard", "premium", "vip"];
const MEMBERSHIP_STATUSES: [&str; 4] = ["active", "expired", "suspended", "pending"];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Inclusive bounds parsed from the query. Either bound may be absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateRange {
    pub start: Option<bson::DateTime>,
    pub end: Option<bson::DateTime>,
}

impl DateRange {
    pub fn parse(query: &DateRangeQuery) -> Result<Self, Error> {
        Ok(Self {
            start: parse_query_date("startDate", query.start_date.as_deref())?,
            end: parse_query_date("endDate", query.end_date.as_deref())?,
        })
    }

    pub fn filter(&self) -> Option<Document> {
        let mut filter = Document::new();
        if let Some(start) = self.start {
            filter.insert("$gte", start);
        }
        if let Some(end) = self.end {
            filter.insert("$lte", end);
        }

        (!filter.is_empty()).then_some(filter)
    }

    pub fn contains(&self, date: bson::DateTime) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemberCounts {
    pub total: u64,
    pub active: u64,
    pub expired: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EquipmentCounts {
    pub total: u64,
    pub available: u64,
    pub maintenance: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueTotals {
    pub total_revenue: f64,
    pub monthly_revenue: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkoutCounts {
    pub total: u64,
    pub public: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserCounts {
    pub total: u64,
    pub trainers: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecentActivity {
    pub payments: Vec<Payment>,
    pub members: Vec<Member>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub members: MemberCounts,
    pub equipment: EquipmentCounts,
    pub payments: RevenueTotals,
    pub workouts: WorkoutCounts,
    pub users: UserCounts,
    pub recent_activity: RecentActivity,
}

fn recent_options(field: &str) -> FindOptions {
    FindOptions::builder()
        .sort(bson::doc! { field: -1 })
        .limit(RECENT_LIMIT)
        .build()
}

/// Recent members only carry the name and email of their user.
fn brief_user(mut member: Member) -> Member {
    if let Populated::Doc(user) = &mut member.user_id {
        user.phone = None;
        user.avatar = None;
    }

    member
}

pub async fn dashboard(
    State(members): State<MemberCollection>,
    State(equipment): State<EquipmentCollection>,
    State(payments): State<PaymentCollection>,
    State(workouts): State<WorkoutCollection>,
    State(users): State<UserCollection>,
    State(payment_deps): State<PaymentDeps>,
    _user: UserAccess,
) -> Result<Json<DashboardResponse>, Error> {
    let member_counts = MemberCounts {
        total: members.count_documents(None, None).await?,
        active: members
            .count_documents(bson::doc! { "membershipStatus": "active" }, None)
            .await?,
        expired: members
            .count_documents(bson::doc! { "membershipStatus": "expired" }, None)
            .await?,
    };

    let equipment_counts = EquipmentCounts {
        total: equipment.count_documents(None, None).await?,
        available: equipment
            .count_documents(bson::doc! { "status": "available" }, None)
            .await?,
        maintenance: equipment
            .count_documents(bson::doc! { "status": "maintenance" }, None)
            .await?,
    };

    let revenue_totals = RevenueTotals {
        total_revenue: revenue(&payments, completed()).await?,
        monthly_revenue: revenue(&payments, completed_since(Some(monthly_window_start())))
            .await?,
    };

    let workout_counts = WorkoutCounts {
        total: workouts.count_documents(None, None).await?,
        public: workouts
            .count_documents(bson::doc! { "isPublic": true }, None)
            .await?,
    };

    let user_counts = UserCounts {
        total: users.count_documents(None, None).await?,
        trainers: users
            .count_documents(bson::doc! { "role": UserRole::Trainer.as_str() }, None)
            .await?,
    };

    let since: bson::DateTime = (OffsetDateTime::now_utc() - Duration::days(RECENT_DAYS)).into();

    let recent_payments = payments
        .find_all(
            bson::doc! { "paymentDate": { "$gte": since } },
            recent_options("paymentDate"),
        )
        .await?;
    let recent_members = members
        .find_all(
            bson::doc! { "createdAt": { "$gte": since } },
            recent_options("createdAt"),
        )
        .await?;
    let relations = MemberRelations::users(&users, &recent_members).await?;

    Ok(Json(DashboardResponse {
        members: member_counts,
        equipment: equipment_counts,
        payments: revenue_totals,
        workouts: workout_counts,
        users: user_counts,
        recent_activity: RecentActivity {
            payments: payment_deps.expand(recent_payments).await?,
            members: recent_members
                .into_iter()
                .map(|it| brief_user(Member::new(it, &relations)))
                .collect(),
        },
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembersReport {
    pub by_type: Vec<GroupCount>,
    pub by_status: Vec<GroupCount>,
    pub new_members: u64,
    pub members_expiring_soon: u64,
}

pub async fn members_report(
    State(members): State<MemberCollection>,
    _user: UserAccess,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<MembersReport>, Error> {
    let range = DateRange::parse(&query)?;
    let window = range.filter().map(|it| bson::doc! { "createdAt": it });

    let by_type = members.count_by("membershipType", window.clone()).await?;
    let by_status = members.count_by("membershipStatus", window).await?;

    let now = OffsetDateTime::now_utc();
    let since: bson::DateTime = one_month_ago(now).into();
    let new_members = members
        .count_documents(bson::doc! { "createdAt": { "$gte": since } }, None)
        .await?;

    let expiring_by: bson::DateTime = (now + Duration::days(EXPIRING_DAYS)).into();
    let members_expiring_soon = members
        .count_documents(
            bson::doc! {
                "membershipStatus": "active",
                "membershipEndDate": { "$gt": bson::DateTime::from(now), "$lte": expiring_by },
            },
            None,
        )
        .await?;

    Ok(Json(MembersReport {
        by_type: fill_counts(&MEMBERSHIP_TYPES, by_type),
        by_status: fill_counts(&MEMBERSHIP_STATUSES, by_status),
        new_members,
        members_expiring_soon,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonthRevenue {
    #[serde(rename = "_id")]
    pub id: YearMonth,
    pub total: f64,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupRevenue {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub total: f64,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RevenueTotal {
    pub total: f64,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub by_month: Vec<MonthRevenue>,
    pub by_type: Vec<GroupRevenue>,
    pub by_method: Vec<GroupRevenue>,
    pub total: RevenueTotal,
}

fn revenue_group(key: impl Into<bson::Bson>) -> Document {
    bson::doc! {
        "$group": {
            "_id": key.into(),
            "total": { "$sum": "$amount" },
            "count": { "$sum": 1 },
        }
    }
}

pub async fn revenue_report(
    State(payments): State<PaymentCollection>,
    _user: UserAccess,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<RevenueReport>, Error> {
    let range = DateRange::parse(&query)?;

    let mut filter = completed();
    if let Some(window) = range.filter() {
        filter.insert("paymentDate", window);
    }
    let matched = bson::doc! { "$match": filter };

    let by_month = payments
        .aggregate_into(vec![
            matched.clone(),
            revenue_group(bson::doc! {
                "year": { "$year": "$paymentDate" },
                "month": { "$month": "$paymentDate" },
            }),
            bson::doc! { "$sort": { "_id.year": 1, "_id.month": 1 } },
        ])
        .await?;
    let by_type = payments
        .aggregate_into(vec![matched.clone(), revenue_group("$paymentType")])
        .await?;
    let by_method = payments
        .aggregate_into(vec![matched.clone(), revenue_group("$paymentMethod")])
        .await?;
    let total: Vec<RevenueTotal> = payments
        .aggregate_into(vec![matched, revenue_group(bson::Bson::Null)])
        .await?;

    Ok(Json(RevenueReport {
        by_month,
        by_type,
        by_method,
        total: total.into_iter().next().unwrap_or_default(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DailyAttendance {
    pub date: String,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    pub total_check_ins: i64,
    pub daily_attendance: Vec<DailyAttendance>,
}

fn day_key(date: bson::DateTime) -> String {
    let date = OffsetDateTime::from(date).to_offset(UtcOffset::UTC).date();

    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Counts check-ins inside `range` per UTC day. Days come out in ascending order and only
/// the latest 30 days with entries are kept; the total covers the whole range.
pub fn bucket_attendance(
    dates: impl IntoIterator<Item = bson::DateTime>,
    range: DateRange,
) -> AttendanceReport {
    let mut total_check_ins = 0;
    let mut days: BTreeMap<String, i64> = BTreeMap::new();

    for date in dates.into_iter().filter(|it| range.contains(*it)) {
        total_check_ins += 1;
        *days.entry(day_key(date)).or_default() += 1;
    }

    let skip = days.len().saturating_sub(ATTENDANCE_DAYS);

    AttendanceReport {
        total_check_ins,
        daily_attendance: days
            .into_iter()
            .skip(skip)
            .map(|(date, count)| DailyAttendance { date, count })
            .collect(),
    }
}

#[derive(Deserialize, Debug)]
struct MemberAttendance {
    #[serde(default)]
    attendance: Vec<Attendance<bson::DateTime>>,
}

pub async fn attendance_report(
    State(members): State<MemberCollection>,
    _user: UserAccess,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<AttendanceReport>, Error> {
    let range = DateRange::parse(&query)?;

    let attendance: Collection<MemberAttendance> =
        members.clone_with_type::<MemberAttendance>().into();
    let rows = attendance
        .find_all(
            None,
            FindOptions::builder()
                .projection(bson::doc! { "attendance": 1 })
                .build(),
        )
        .await?;

    Ok(Json(bucket_attendance(
        rows.into_iter()
            .flat_map(|it| it.attendance)
            .map(|it| it.date),
        range,
    )))
}
