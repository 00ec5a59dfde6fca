pub mod row_change;
