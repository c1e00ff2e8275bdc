//! Реализация `Driver` поверх системной библиотеки OpenCL

use super::bindings::*;
use super::callbacks::log_context_notify;
use super::driver::{ArgValue, Driver};
use super::status::ClStatus;
use super::types::*;
use std::ffi::{c_void, CString};
use std::ptr;

/// Проверка кода возврата OpenCL
macro_rules! cl_check {
    ($expr:expr) => {
        ClStatus::check(unsafe { $expr })
    };
}

/// Создание объекта OpenCL с кодом ошибки в последнем аргументе
macro_rules! cl_create {
    ($func:ident($($arg:expr),*)) => {{
        let mut errcode: cl_int = CL_SUCCESS;
        let obj = unsafe { $func($($arg,)* &mut errcode) };
        if errcode != CL_SUCCESS {
            Err(ClStatus(errcode))
        } else if obj.is_null() {
            Err(ClStatus(CL_INVALID_VALUE))
        } else {
            Ok(obj)
        }
    }};
}

/// Драйвер, линкуемый с `libOpenCL` (ICD loader)
#[derive(Debug, Default)]
pub struct NativeDriver;

impl NativeDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for NativeDriver {
    fn platform_ids(&self) -> Result<Vec<cl_platform_id>, ClStatus> {
        let mut count: cl_uint = 0;
        cl_check!(clGetPlatformIDs(0, ptr::null_mut(), &mut count))?;
        let mut platforms = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            cl_check!(clGetPlatformIDs(count, platforms.as_mut_ptr(), ptr::null_mut()))?;
        }
        Ok(platforms)
    }

    fn platform_info(
        &self,
        platform: cl_platform_id,
        param: cl_platform_info,
    ) -> Result<Vec<u8>, ClStatus> {
        let mut size = 0usize;
        cl_check!(clGetPlatformInfo(platform, param, 0, ptr::null_mut(), &mut size))?;
        let mut value = vec![0u8; size];
        cl_check!(clGetPlatformInfo(
            platform,
            param,
            size,
            value.as_mut_ptr() as *mut c_void,
            ptr::null_mut()
        ))?;
        Ok(value)
    }

    fn device_ids(
        &self,
        platform: cl_platform_id,
        device_type: cl_device_type,
    ) -> Result<Vec<cl_device_id>, ClStatus> {
        let mut count: cl_uint = 0;
        cl_check!(clGetDeviceIDs(platform, device_type, 0, ptr::null_mut(), &mut count))?;
        let mut devices = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            cl_check!(clGetDeviceIDs(
                platform,
                device_type,
                count,
                devices.as_mut_ptr(),
                ptr::null_mut()
            ))?;
        }
        Ok(devices)
    }

    fn device_info(
        &self,
        device: cl_device_id,
        param: cl_device_info,
    ) -> Result<Vec<u8>, ClStatus> {
        let mut size = 0usize;
        cl_check!(clGetDeviceInfo(device, param, 0, ptr::null_mut(), &mut size))?;
        let mut value = vec![0u8; size];
        cl_check!(clGetDeviceInfo(
            device,
            param,
            size,
            value.as_mut_ptr() as *mut c_void,
            ptr::null_mut()
        ))?;
        Ok(value)
    }

    fn create_context(&self, device: cl_device_id) -> Result<cl_context, ClStatus> {
        cl_create!(clCreateContext(
            ptr::null(),
            1,
            &device,
            Some(log_context_notify),
            ptr::null_mut()
        ))
    }

    fn create_command_queue(
        &self,
        context: cl_context,
        device: cl_device_id,
        properties: cl_command_queue_properties,
    ) -> Result<cl_command_queue, ClStatus> {
        cl_create!(clCreateCommandQueue(context, device, properties))
    }

    fn create_program_with_source(
        &self,
        context: cl_context,
        source: &str,
    ) -> Result<cl_program, ClStatus> {
        let source_ptr = source.as_ptr() as *const std::os::raw::c_char;
        let source_len = source.len();
        cl_create!(clCreateProgramWithSource(context, 1, &source_ptr, &source_len))
    }

    fn build_program(
        &self,
        program: cl_program,
        device: cl_device_id,
        options: &str,
    ) -> Result<(), ClStatus> {
        let options = CString::new(options).map_err(|_| ClStatus(CL_INVALID_BUILD_OPTIONS))?;
        cl_check!(clBuildProgram(
            program,
            1,
            &device,
            options.as_ptr(),
            None,
            ptr::null_mut()
        ))
    }

    fn program_build_log(
        &self,
        program: cl_program,
        device: cl_device_id,
    ) -> Result<String, ClStatus> {
        let mut log_size = 0usize;
        cl_check!(clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            0,
            ptr::null_mut(),
            &mut log_size
        ))?;

        let mut log = vec![0u8; log_size];
        cl_check!(clGetProgramBuildInfo(
            program,
            device,
            CL_PROGRAM_BUILD_LOG,
            log_size,
            log.as_mut_ptr() as *mut c_void,
            ptr::null_mut()
        ))?;

        Ok(String::from_utf8_lossy(&log)
            .trim_end_matches('\0')
            .to_string())
    }

    fn create_kernel(&self, program: cl_program, name: &str) -> Result<cl_kernel, ClStatus> {
        let name = CString::new(name).map_err(|_| ClStatus(CL_INVALID_KERNEL_NAME))?;
        cl_create!(clCreateKernel(program, name.as_ptr()))
    }

    fn create_buffer(
        &self,
        context: cl_context,
        flags: cl_mem_flags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<cl_mem, ClStatus> {
        // С CL_MEM_COPY_HOST_PTR драйвер только читает из указателя
        let host_ptr = match host_data {
            Some(data) => data.as_ptr() as *mut c_void,
            None => ptr::null_mut(),
        };
        cl_create!(clCreateBuffer(context, flags, size, host_ptr))
    }

    fn set_kernel_arg(
        &self,
        kernel: cl_kernel,
        index: cl_uint,
        value: ArgValue<'_>,
    ) -> Result<(), ClStatus> {
        match value {
            ArgValue::Mem(mem) => cl_check!(clSetKernelArg(
                kernel,
                index,
                std::mem::size_of::<cl_mem>(),
                &mem as *const _ as *const c_void
            )),
            ArgValue::Bytes(bytes) => cl_check!(clSetKernelArg(
                kernel,
                index,
                bytes.len(),
                bytes.as_ptr() as *const c_void
            )),
            ArgValue::Local(size) => {
                cl_check!(clSetKernelArg(kernel, index, size, ptr::null()))
            }
        }
    }

    fn enqueue_write_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        data: &[u8],
    ) -> Result<cl_event, ClStatus> {
        let mut event: cl_event = ptr::null_mut();
        cl_check!(clEnqueueWriteBuffer(
            queue,
            buffer,
            CL_TRUE,
            offset,
            data.len(),
            data.as_ptr() as *const c_void,
            0,
            ptr::null(),
            &mut event
        ))?;
        Ok(event)
    }

    fn enqueue_read_buffer(
        &self,
        queue: cl_command_queue,
        buffer: cl_mem,
        offset: usize,
        out: &mut [u8],
    ) -> Result<cl_event, ClStatus> {
        let mut event: cl_event = ptr::null_mut();
        cl_check!(clEnqueueReadBuffer(
            queue,
            buffer,
            CL_TRUE,
            offset,
            out.len(),
            out.as_mut_ptr() as *mut c_void,
            0,
            ptr::null(),
            &mut event
        ))?;
        Ok(event)
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: cl_command_queue,
        kernel: cl_kernel,
        global: &[usize],
        local: &[usize],
    ) -> Result<cl_event, ClStatus> {
        if local.len() != global.len() {
            return Err(ClStatus(CL_INVALID_WORK_DIMENSION));
        }
        let mut event: cl_event = ptr::null_mut();
        cl_check!(clEnqueueNDRangeKernel(
            queue,
            kernel,
            global.len() as cl_uint,
            ptr::null(),
            global.as_ptr(),
            local.as_ptr(),
            0,
            ptr::null(),
            &mut event
        ))?;
        Ok(event)
    }

    fn wait_for_events(&self, events: &[cl_event]) -> Result<(), ClStatus> {
        cl_check!(clWaitForEvents(events.len() as cl_uint, events.as_ptr()))
    }

    fn event_profiling_info(
        &self,
        event: cl_event,
        param: cl_profiling_info,
    ) -> Result<cl_ulong, ClStatus> {
        let mut value: cl_ulong = 0;
        cl_check!(clGetEventProfilingInfo(
            event,
            param,
            std::mem::size_of::<cl_ulong>(),
            &mut value as *mut _ as *mut c_void,
            ptr::null_mut()
        ))?;
        Ok(value)
    }

    fn flush(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        cl_check!(clFlush(queue))
    }

    fn finish(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        cl_check!(clFinish(queue))
    }

    fn release_event(&self, event: cl_event) -> Result<(), ClStatus> {
        cl_check!(clReleaseEvent(event))
    }

    fn release_mem_object(&self, buffer: cl_mem) -> Result<(), ClStatus> {
        cl_check!(clReleaseMemObject(buffer))
    }

    fn release_kernel(&self, kernel: cl_kernel) -> Result<(), ClStatus> {
        cl_check!(clReleaseKernel(kernel))
    }

    fn release_program(&self, program: cl_program) -> Result<(), ClStatus> {
        cl_check!(clReleaseProgram(program))
    }

    fn release_command_queue(&self, queue: cl_command_queue) -> Result<(), ClStatus> {
        cl_check!(clReleaseCommandQueue(queue))
    }

    fn release_context(&self, context: cl_context) -> Result<(), ClStatus> {
        cl_check!(clReleaseContext(context))
    }
}
