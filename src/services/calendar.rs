use crate::models::Appointment;

pub fn generate_ics(appointment: &Appointment, business_name: &str) -> String {
    let dtstart = appointment.start_at.format("%Y%m%dT%H%M%S").to_string();
    let dtend = appointment.end_at().format("%Y%m%dT%H%M%S").to_string();
    let dtstamp = appointment.created_at.format("%Y%m%dT%H%M%S").to_string();
    let uid = format!("{}@salonbook", appointment.id);

    let summary = format!("{} at {}", appointment.service.name, business_name);

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Salonbook//Booking Engine//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         STATUS:CONFIRMED\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}
