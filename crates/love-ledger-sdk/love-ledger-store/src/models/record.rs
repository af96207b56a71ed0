use diesel::prelude::*;

use crate::schema::records;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = records)]
pub struct RecordRow {
    pub key: String,
    pub value: String,
    pub version: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = records)]
pub struct NewRecordRow {
    pub key: String,
    pub value: String,
    pub version: i64,
}
