//! Граница между обертками и реализацией OpenCL API
//!
//! Трейт `Driver` повторяет набор вызовов C API, который нужен конвейеру
//! умножения. Нативная реализация ходит в `libOpenCL`, эмулятор хоста
//! выполняет те же вызовы в процессе.

use super::status::ClStatus;
use super::types::*;
use std::rc::Rc;

/// Разделяемая ссылка на драйвер; каждая обертка держит свою копию
pub type SharedDriver = Rc<dyn Driver>;

/// Значение аргумента ядра в терминах `clSetKernelArg`
#[derive(Debug, Clone, Copy)]
pub enum ArgValue<'a> {
    /// Объект памяти (`sizeof(cl_mem)`, указатель на хэндл)
    Mem(cl_mem),
    /// Скаляр, переданный байтами
    Bytes(&'a [u8]),
    /// Локальная память рабочей группы: только размер, нулевой указатель
    Local(usize),
}

pub trait Driver {
    fn platform_ids(&self) -> Result<Vec<cl_platform_id>, ClStatus>;

    fn platform_info(
        &self,
        platform: cl_platform_id,
        param: cl_platform_info,
    ) -> Result<Vec<u8>, ClStatus>;

    fn device_ids(
        &self,
        platform: cl_platform_id,
        device_type: cl_device_type,
    ) -> Result<Vec<cl_device_id>, ClStatus>;

    fn device_info(&self, device: cl_device_id, param: cl_device_info)
        -> Result<Vec<u8>, ClStatus>;

    fn create_context(&self, device: cl_device_id) -> Result<cl_context, ClStatus>;

    fn create_command_queue(
        &self,
        context: cl_context,
        device: cl_device_id,
        properties: cl_command_queue_properties,
    ) -> Result<cl_command_queue, ClStatus>;

    fn create_program_with_source(
        &self,
        context: cl_context,
        source: &str,
    ) -> Result<cl_program, ClStatus>;

    fn build_program(
        &self,
        program: cl_program,
        device: cl_device_id,
        options: &str,
    ) -> Result<(), ClStatus>;

    fn program_build_log(
        &self,
        program: cl_program,
        device: cl_device_id,
    ) -> Result<String, ClStatus>;

    fn create_kernel(&self, program: cl_program, name: &str) -> Result<cl_kernel, ClStatus>;

    /// `host_data` передается только вместе с `CL_MEM_COPY_HOST_PTR`
    fn create_buffer(
        &self,
        context: cl_context,
        flags: cl_mem_flags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<cl_mem, ClStatus>;

    fn set_kernel_arg(
        &self,
        kernel: cl_kernel,
        index: cl_uint,
        value: ArgValue<'_>,
    ) -> Result<(), ClStatus>;

    /// Блокирующая запись host → device
    fn enqueue_write_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        data: &[u8],
    ) -> Result<cl_event, ClStatus>;

    /// Блокирующее чтение device → host
    fn enqueue_read_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        out: &mut [u8],
    ) -> Result<cl_event, ClStatus>;

    fn enqueue_nd_range_kernel(
        &self,
        queue: cl_command_queue,
        kernel: cl_kernel,
        global: &[usize],
        local: &[usize],
    ) -> Result<cl_event, ClStatus>;

    fn wait_for_events(&self, events: &[cl_event]) -> Result<(), ClStatus>;

    fn event_profiling_info(
        &self,
        event: cl_event,
        param: cl_profiling_info,
    ) -> Result<cl_ulong, ClStatus>;

    fn flush(&self, queue: cl_command_queue) -> Result<(), ClStatus>;

    fn finish(&self, queue: cl_command_queue) -> Result<(), ClStatus>;

    fn release_event(&self, event: cl_event) -> Result<(), ClStatus>;
    fn release_mem_object(&self, buffer: cl_mem) -> Result<(), ClStatus>;
    fn release_kernel(&self, kernel: cl_kernel) -> Result<(), ClStatus>;
    fn release_program(&self, program: cl_program) -> Result<(), ClStatus>;
    fn release_command_queue(&self, queue: cl_command_queue) -> Result<(), ClStatus>;
    fn release_context(&self, context: cl_context) -> Result<(), ClStatus>;
}
