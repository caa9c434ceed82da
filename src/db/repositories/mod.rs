mod measurements;
mod washings;
